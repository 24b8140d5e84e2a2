//! Download engine: dial the peer, speak a fetch protocol over the split
//! socket, stream the body into a file at an offset, report progress and
//! a single completion event.

use std::io::{self, SeekFrom};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beam_core::{find_header_end, parse_response_head, HEADER_BUF_SIZE};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// Body bytes are pulled off the socket in chunks of this size.
const READ_CHUNK_SIZE: usize = 4096;

/// Lifecycle of one download job, reported on the event channel. Exactly
/// one of `Completed` or `Failed` follows `Started`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    Started,
    Completed,
    Failed,
}

/// What the protocol learned from the response head.
pub struct HeadInfo {
    /// Declared body length; 0 means read until the stream closes.
    pub content_length: u64,
    /// Bytes read past the head terminator, i.e. the first body bytes.
    pub leftover: Vec<u8>,
}

/// Wire protocol spoken by a download job: write the request, then parse
/// the response head off the socket.
#[async_trait]
pub trait FetchProtocol: Send + Sync + 'static {
    async fn send_request(&self, writer: &mut OwnedWriteHalf) -> io::Result<()>;
    async fn parse_head(&self, reader: &mut OwnedReadHalf) -> io::Result<HeadInfo>;
}

/// Percent-encode a server path, keeping `/` and the unreserved set.
fn encode_uri(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for &b in path.as_bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// The HTTP flavor of the fetch protocol: a GET with a fixed header set,
/// answered by a status line and header block.
pub struct HttpFetch {
    path: String,
}

impl HttpFetch {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FetchProtocol for HttpFetch {
    async fn send_request(&self, writer: &mut OwnedWriteHalf) -> io::Result<()> {
        let request = format!(
            "GET {} HTTP/1.1\r\n\
             Accept: application/xml,application/xhtml+xml,text/html;q=0.9,text/plain;q=0.8,image/png,*/*;q=0.5\r\n\
             Accept-Language: en-US, zh-CN\r\n\
             User-Agent: beam\r\n\
             Accept-Charset: utf-8, iso-8859-1, utf-16, *;q=0.7\r\n\
             \r\n",
            encode_uri(&self.path)
        );
        writer.write_all(request.as_bytes()).await?;
        writer.flush().await
    }

    async fn parse_head(&self, reader: &mut OwnedReadHalf) -> io::Result<HeadInfo> {
        let mut buf = [0u8; HEADER_BUF_SIZE];
        let mut len = 0;
        let mut split = None;
        while split.is_none() {
            if len == HEADER_BUF_SIZE {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "response head too large"));
            }
            let read = reader.read(&mut buf[len..]).await?;
            if read == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            len += read;
            split = find_header_end(&buf[..len]);
        }
        let split = split.ok_or_else(|| io::Error::from(io::ErrorKind::InvalidData))?;
        let head = parse_response_head(&buf[..split])
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        if !head.is_success() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("server answered {}", head.code),
            ));
        }
        Ok(HeadInfo {
            content_length: head.content_length(),
            leftover: buf[split..len].to_vec(),
        })
    }
}

struct JobState {
    expected: AtomicU64,
    downloaded: AtomicU64,
}

/// One single-use download job. `start` spawns the transfer task; progress
/// is queryable at any time, and exactly one terminal event lands on the
/// listener channel. Retrying means a fresh job.
pub struct Download<P: FetchProtocol> {
    server: SocketAddr,
    save_path: PathBuf,
    start_offset: u64,
    read_timeout: Duration,
    protocol: P,
    events: mpsc::UnboundedSender<JobEvent>,
    state: JobState,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<P: FetchProtocol> Download<P> {
    pub fn new(
        server: SocketAddr,
        save_path: PathBuf,
        start_offset: u64,
        read_timeout: Duration,
        protocol: P,
        events: mpsc::UnboundedSender<JobEvent>,
    ) -> Arc<Self> {
        let (stop_tx, _) = watch::channel(false);
        Arc::new(Self {
            server,
            save_path,
            start_offset,
            read_timeout,
            protocol,
            events,
            state: JobState {
                expected: AtomicU64::new(0),
                downloaded: AtomicU64::new(0),
            },
            stop_tx,
            task: Mutex::new(None),
        })
    }

    /// Spawn the transfer task.
    pub async fn start(self: &Arc<Self>) {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let _ = this.events.send(JobEvent::Started);
            let event = match this.run().await {
                Ok(()) => JobEvent::Completed,
                Err(err) => {
                    tracing::debug!(path = %this.save_path.display(), error = %err, "download failed");
                    JobEvent::Failed
                }
            };
            let _ = this.events.send(event);
        });
        *self.task.lock().await = Some(handle);
    }

    async fn run(&self) -> io::Result<()> {
        let mut stop_rx = self.stop_tx.subscribe();
        tokio::select! {
            result = self.transfer() => result,
            _ = stop_rx.changed() => Err(io::Error::new(io::ErrorKind::Interrupted, "stopped")),
        }
    }

    async fn transfer(&self) -> io::Result<()> {
        let stream = TcpStream::connect(self.server).await?;
        let (mut reader, mut writer) = stream.into_split();

        self.protocol.send_request(&mut writer).await?;
        let head = self.timed(self.protocol.parse_head(&mut reader)).await?;
        self.state
            .expected
            .store(head.content_length, Ordering::SeqCst);
        tracing::debug!(
            path = %self.save_path.display(),
            expected = head.content_length,
            "response head parsed"
        );

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&self.save_path)
            .await?;
        file.seek(SeekFrom::Start(self.start_offset)).await?;

        let expected = head.content_length;
        let mut downloaded = 0u64;
        if !head.leftover.is_empty() {
            file.write_all(&head.leftover).await?;
            downloaded += head.leftover.len() as u64;
            self.state.downloaded.store(downloaded, Ordering::SeqCst);
        }

        let mut chunk = vec![0u8; READ_CHUNK_SIZE];
        while expected == 0 || downloaded < expected {
            let read = self.timed(reader.read(&mut chunk)).await?;
            if read == 0 {
                break;
            }
            file.write_all(&chunk[..read]).await?;
            downloaded += read as u64;
            self.state.downloaded.store(downloaded, Ordering::SeqCst);
        }
        file.flush().await?;
        Ok(())
    }

    async fn timed<T>(
        &self,
        fut: impl std::future::Future<Output = io::Result<T>>,
    ) -> io::Result<T> {
        tokio::time::timeout(self.read_timeout, fut)
            .await
            .map_err(|_| io::Error::from(io::ErrorKind::TimedOut))?
    }

    /// Whole percentage points complete; 0 while the expected size is
    /// unknown. Non-decreasing over the life of the job.
    pub fn progress(&self) -> u8 {
        let expected = self.state.expected.load(Ordering::SeqCst);
        if expected == 0 {
            return 0;
        }
        let downloaded = self.state.downloaded.load(Ordering::SeqCst);
        ((100 * downloaded) / expected).min(100) as u8
    }

    pub fn downloaded_bytes(&self) -> u64 {
        self.state.downloaded.load(Ordering::SeqCst)
    }

    pub fn expected_bytes(&self) -> u64 {
        self.state.expected.load(Ordering::SeqCst)
    }

    /// Force an in-flight transfer to fail, then wait for its task. Safe
    /// to call more than once or after natural completion.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
    }
}
