// Beam daemon: share a directory over an ad-hoc hotspot, or fetch a
// shared file from a peer.

mod config;
mod download;
mod files;
mod pool;
mod server;
mod transfer;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use beam_core::{mime, MetaDocument, META_FILE_NAME};

use crate::config::Config;
use crate::files::StaticFiles;
use crate::server::HttpServer;
use crate::transfer::{MediaTransfer, TransferEvent};

const VERSION: &str = env!("CARGO_PKG_VERSION");

enum Mode {
    Serve { root: PathBuf, share: Option<PathBuf> },
    Fetch { host: String },
}

fn usage() -> ! {
    eprintln!("usage: beam-daemon serve <root> [--share <file>]");
    eprintln!("       beam-daemon fetch <host>");
    eprintln!("       beam-daemon --version");
    std::process::exit(2);
}

fn parse_args() -> Mode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    for arg in &args {
        if arg == "--version" || arg == "-V" {
            println!("beam-daemon {VERSION}");
            std::process::exit(0);
        }
    }
    match args.first().map(String::as_str) {
        Some("serve") => {
            let Some(root) = args.get(1) else { usage() };
            let share = match args.get(2).map(String::as_str) {
                Some("--share") => match args.get(3) {
                    Some(file) => Some(PathBuf::from(file)),
                    None => usage(),
                },
                Some(_) => usage(),
                None => None,
            };
            Mode::Serve {
                root: PathBuf::from(root),
                share,
            }
        }
        Some("fetch") => match args.get(1) {
            Some(host) => Mode::Fetch { host: host.clone() },
            None => usage(),
        },
        _ => usage(),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mode = parse_args();
    let cfg = Config::load();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        match mode {
            Mode::Serve { root, share } => run_serve(&cfg, &root, share.as_deref()).await,
            Mode::Fetch { host } => run_fetch(&cfg, &host).await,
        }
    })
}

async fn run_serve(cfg: &Config, root: &Path, share: Option<&Path>) -> anyhow::Result<()> {
    if let Some(file) = share {
        publish_meta(root, file).await?;
    }
    let handler = Arc::new(StaticFiles::new(root));
    let mut server = HttpServer::new(handler, cfg.workers);
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.listen_port));
    server.start(addr).await.context("binding share server")?;
    tracing::info!(
        port = server.listen_port().unwrap_or(cfg.listen_port),
        root = %root.display(),
        "sharing"
    );
    shutdown_signal().await?;
    server.stop().await;
    Ok(())
}

/// Publish the metadata document describing the shared file into the serve
/// root. The file itself must live inside the root; peers fetch it by its
/// final path segment.
async fn publish_meta(root: &Path, file: &Path) -> anyhow::Result<()> {
    let metadata = tokio::fs::metadata(file)
        .await
        .with_context(|| format!("shared file {}", file.display()))?;
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .context("shared file has no usable name")?;
    let doc = MetaDocument {
        data: file.to_string_lossy().into_owned(),
        title: name.to_string(),
        size: metadata.len(),
        mimetype: mime::mime_for_path(name).to_string(),
    };
    tokio::fs::write(root.join(META_FILE_NAME), doc.encode()).await?;
    tracing::info!(title = name, size = metadata.len(), "share published");
    Ok(())
}

async fn run_fetch(cfg: &Config, host: &str) -> anyhow::Result<()> {
    let addr = tokio::net::lookup_host((host, cfg.listen_port))
        .await
        .with_context(|| format!("resolving {host}"))?
        .next()
        .with_context(|| format!("no address for {host}"))?;
    tokio::fs::create_dir_all(&cfg.save_dir).await?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let session = MediaTransfer::new(addr, cfg.save_dir.clone(), cfg.read_timeout(), tx);
    session.start();

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut last_reported = 0u8;
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(TransferEvent::Completed) => {
                    let title = session
                        .metadata()
                        .map(|m| m.title)
                        .unwrap_or_default();
                    tracing::info!(title = %title, dir = %cfg.save_dir.display(), "transfer complete");
                    return Ok(());
                }
                Some(TransferEvent::Failed) | None => anyhow::bail!("transfer failed"),
            },
            _ = ticker.tick() => {
                let progress = session.progress();
                if progress != last_reported {
                    last_reported = progress;
                    tracing::info!(progress, "downloading");
                }
            }
        }
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
