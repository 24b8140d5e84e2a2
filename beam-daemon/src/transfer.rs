//! Transfer orchestrator: fetch the metadata document, then the payload
//! it names. One terminal event for the whole session.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use beam_core::meta;
use beam_core::{MetaDocument, META_FILE_NAME};
use tokio::sync::mpsc;

use crate::download::{Download, HttpFetch, JobEvent};

/// Terminal outcome of a transfer session. A failure in either phase and a
/// stop both surface as `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEvent {
    Completed,
    Failed,
}

/// Drives the two-phase fetch against one sharing peer. Metadata becomes
/// queryable after phase 1; progress reflects the payload only.
pub struct MediaTransfer {
    server: SocketAddr,
    save_dir: PathBuf,
    read_timeout: Duration,
    events: mpsc::UnboundedSender<TransferEvent>,
    stopped: AtomicBool,
    active: Mutex<Option<Arc<Download<HttpFetch>>>>,
    payload: Mutex<Option<Arc<Download<HttpFetch>>>>,
    metadata: Mutex<Option<MetaDocument>>,
}

impl MediaTransfer {
    pub fn new(
        server: SocketAddr,
        save_dir: PathBuf,
        read_timeout: Duration,
        events: mpsc::UnboundedSender<TransferEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            server,
            save_dir,
            read_timeout,
            events,
            stopped: AtomicBool::new(false),
            active: Mutex::new(None),
            payload: Mutex::new(None),
            metadata: Mutex::new(None),
        })
    }

    /// Kick off the session; the terminal event lands on the listener
    /// channel.
    pub fn start(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            let event = this.drive().await;
            let _ = this.events.send(event);
        });
    }

    async fn drive(&self) -> TransferEvent {
        let meta_save = self.save_dir.join(META_FILE_NAME);
        let meta_path = format!("/{META_FILE_NAME}");
        if self.run_job(&meta_path, &meta_save, false).await.is_err() {
            return TransferEvent::Failed;
        }

        let doc = match tokio::fs::read_to_string(&meta_save).await {
            Ok(text) => MetaDocument::parse(&text),
            Err(err) => {
                tracing::warn!(error = %err, "metadata document unreadable");
                return TransferEvent::Failed;
            }
        };
        if doc.data.is_empty() {
            tracing::warn!("metadata document names no payload");
            return TransferEvent::Failed;
        }
        tracing::info!(title = %doc.title, size = doc.size, mimetype = %doc.mimetype, "metadata resolved");
        let name = meta::file_name(&doc.data).to_string();
        *self.metadata.lock().unwrap_or_else(|e| e.into_inner()) = Some(doc);

        // A stop that landed during phase 1 must not let phase 2 begin.
        if self.stopped.load(Ordering::SeqCst) {
            return TransferEvent::Failed;
        }

        let payload_path = format!("/{name}");
        let payload_save = self.save_dir.join(&name);
        match self.run_job(&payload_path, &payload_save, true).await {
            Ok(()) => TransferEvent::Completed,
            Err(()) => TransferEvent::Failed,
        }
    }

    async fn run_job(&self, server_path: &str, save: &Path, is_payload: bool) -> Result<(), ()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(());
        }
        let (tx, mut rx) = mpsc::unbounded_channel();
        let job = Download::new(
            self.server,
            save.to_path_buf(),
            0,
            self.read_timeout,
            HttpFetch::new(server_path),
            tx,
        );
        *self.active.lock().unwrap_or_else(|e| e.into_inner()) = Some(job.clone());
        if is_payload {
            *self.payload.lock().unwrap_or_else(|e| e.into_inner()) = Some(job.clone());
        }
        if self.stopped.load(Ordering::SeqCst) {
            return Err(());
        }
        job.start().await;
        loop {
            match rx.recv().await {
                Some(JobEvent::Started) => continue,
                Some(JobEvent::Completed) => return Ok(()),
                Some(JobEvent::Failed) | None => return Err(()),
            }
        }
    }

    /// Abort whichever phase is active; the session ends with `Failed` and
    /// phase 2 never starts afterwards. Safe after natural completion.
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let job = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(job) = job {
            job.stop().await;
        }
    }

    /// Payload progress in whole percent; 0 during phase 1.
    pub fn progress(&self) -> u8 {
        self.payload
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|job| job.progress())
            .unwrap_or(0)
    }

    /// Resolved payload description, available once phase 1 has finished.
    pub fn metadata(&self) -> Option<MetaDocument> {
        self.metadata
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
