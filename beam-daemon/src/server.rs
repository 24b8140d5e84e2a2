//! HTTP server engine: accept loop feeding a worker pool, per-connection
//! session loop, pluggable request handler. One session serves any number
//! of keep-alive requests.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use beam_core::{
    encode_response_head, find_header_end, mime::MIME_PLAINTEXT, parse_request_head, HttpError,
    Method, Request, Status, HEADER_BUF_SIZE,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::pool::WorkerPool;

/// Response bodies stream in chunks of this size.
const BODY_CHUNK_SIZE: usize = 16 * 1024;

/// Pluggable per-request behavior. An `Err` is answered with its status and
/// plaintext message, then the session closes.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn serve(&self, request: &Request) -> Result<Response, HttpError>;
}

/// Response body: nothing, in-memory bytes, or a window of an open file.
pub enum Body {
    Empty,
    Bytes(Vec<u8>),
    /// Reader already positioned at the window start; exactly `len` bytes
    /// are streamed.
    File { file: tokio::fs::File, len: u64 },
}

impl Body {
    pub fn len(&self) -> u64 {
        match self {
            Body::Empty => 0,
            Body::Bytes(bytes) => bytes.len() as u64,
            Body::File { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct Response {
    pub status: Status,
    pub mime: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl Response {
    pub fn new(status: Status, mime: &str, body: Body) -> Self {
        Self {
            status,
            mime: Some(mime.to_string()),
            headers: Vec::new(),
            body,
        }
    }

    pub fn text(status: Status, text: &str) -> Self {
        Self::new(status, MIME_PLAINTEXT, Body::Bytes(text.as_bytes().to_vec()))
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

struct Running {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
    pool: WorkerPool,
}

/// The server engine. `start` binds and accepts; each accepted connection
/// becomes a session task on a fixed-size worker pool, so at most
/// `workers` sessions are live at once and further connections queue.
pub struct HttpServer {
    handler: Arc<dyn RequestHandler>,
    workers: usize,
    running: Option<Running>,
}

impl HttpServer {
    pub fn new(handler: Arc<dyn RequestHandler>, workers: usize) -> Self {
        Self {
            handler,
            workers,
            running: None,
        }
    }

    /// Bind and start accepting. Fails if the port is taken or the server
    /// is already running.
    pub async fn start(&mut self, addr: SocketAddr) -> io::Result<()> {
        if self.running.is_some() {
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, "server already running"));
        }
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let pool = WorkerPool::start(self.workers);
        let submit = pool.handle();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let handler = self.handler.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            tracing::debug!(%peer, "connection accepted");
                            let handler = handler.clone();
                            if submit.submit(run_session(stream, handler)).is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "accept failed");
                        }
                    },
                }
            }
            // Dropping the listener here closes the listening socket.
        });
        tracing::info!(addr = %local_addr, workers = self.workers, "listening");
        self.running = Some(Running {
            local_addr,
            shutdown_tx,
            accept_task,
            pool,
        });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Actual listen port after a successful `start` (useful with port 0).
    pub fn listen_port(&self) -> Option<u16> {
        self.running.as_ref().map(|r| r.local_addr.port())
    }

    /// Close the listening socket, join the accept loop, then stop the
    /// pool. Sessions already picked up by a worker run until their
    /// connection closes; queued connections are dropped unserved.
    pub async fn stop(&mut self) {
        if let Some(mut running) = self.running.take() {
            let _ = running.shutdown_tx.send(true);
            let _ = running.accept_task.await;
            running.pool.stop().await;
            tracing::info!("server stopped");
        }
    }
}

enum SessionError {
    Http(HttpError),
    Io(io::Error),
}

/// Serve one connection: read request heads, dispatch, answer, repeat
/// while responses carry keep-alive. Transport errors end the session
/// silently; protocol errors are answered before closing.
async fn run_session(mut stream: TcpStream, handler: Arc<dyn RequestHandler>) {
    let peer = stream.peer_addr().ok();
    let mut carry: Vec<u8> = Vec::new();
    loop {
        let (request, leftover) =
            match read_request_head(&mut stream, std::mem::take(&mut carry)).await {
                Ok(Some(parsed)) => parsed,
                Ok(None) => break,
                Err(SessionError::Http(err)) => {
                    let _ = send_error(&mut stream, &err).await;
                    break;
                }
                Err(SessionError::Io(err)) => {
                    tracing::debug!(?peer, error = %err, "session transport error");
                    break;
                }
            };
        carry = leftover;
        tracing::debug!(?peer, method = request.method.as_str(), uri = %request.uri, "request");

        let response = match handler.serve(&request).await {
            Ok(response) => response,
            Err(err) => {
                let _ = send_error(&mut stream, &err).await;
                break;
            }
        };
        match send_response(&mut stream, request.method, response).await {
            Ok(true) => continue,
            Ok(false) | Err(_) => break,
        }
    }
}

/// Accumulate reads into a fixed head buffer until the blank-line
/// terminator arrives. `carry` holds bytes a previous read pulled past the
/// last terminator (a pipelined next request). Returns the parsed request
/// plus the bytes past this head's terminator; `None` on a clean close
/// before any byte.
async fn read_request_head(
    stream: &mut TcpStream,
    carry: Vec<u8>,
) -> Result<Option<(Request, Vec<u8>)>, SessionError> {
    let mut buf = [0u8; HEADER_BUF_SIZE];
    let mut len = carry.len().min(HEADER_BUF_SIZE);
    buf[..len].copy_from_slice(&carry[..len]);
    let mut split = find_header_end(&buf[..len]);
    while split.is_none() {
        if len == HEADER_BUF_SIZE {
            return Err(SessionError::Http(HttpError::new(
                Status::BadRequest,
                "BAD REQUEST: Header block too large.",
            )));
        }
        let read = stream.read(&mut buf[len..]).await.map_err(SessionError::Io)?;
        if read == 0 {
            if len == 0 {
                return Ok(None);
            }
            // Peer vanished mid-head.
            return Err(SessionError::Io(io::ErrorKind::UnexpectedEof.into()));
        }
        len += read;
        split = find_header_end(&buf[..len]);
    }
    let split = split.ok_or_else(|| SessionError::Io(io::ErrorKind::InvalidData.into()))?;
    let request = parse_request_head(&buf[..split]).map_err(SessionError::Http)?;
    Ok(Some((request, buf[split..len].to_vec())))
}

/// Write head and body. HEAD responses advertise the length but never send
/// the body. Returns whether the head promised keep-alive, which is also
/// the session's cue to keep looping.
async fn send_response(
    stream: &mut TcpStream,
    method: Method,
    response: Response,
) -> io::Result<bool> {
    let content_length = response.body.len();
    let head = encode_response_head(
        response.status,
        response.mime.as_deref(),
        &response.headers,
        Some(content_length),
    );
    stream.write_all(&head).await?;
    let keep_alive = content_length > 0;

    if method != Method::Head {
        match response.body {
            Body::Empty => {}
            Body::Bytes(bytes) => stream.write_all(&bytes).await?,
            Body::File { mut file, len } => {
                let mut remaining = len;
                let mut chunk = vec![0u8; BODY_CHUNK_SIZE];
                while remaining > 0 {
                    let want = remaining.min(BODY_CHUNK_SIZE as u64) as usize;
                    let read = file.read(&mut chunk[..want]).await?;
                    if read == 0 {
                        // File shrank under us; send what we have.
                        break;
                    }
                    stream.write_all(&chunk[..read]).await?;
                    remaining -= read as u64;
                }
            }
        }
    }
    stream.flush().await?;
    Ok(keep_alive)
}

async fn send_error(stream: &mut TcpStream, err: &HttpError) -> io::Result<()> {
    let response = Response::text(err.status, &err.message);
    send_response(stream, Method::Get, response).await.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::StaticFiles;
    use beam_core::parse_response_head;
    use std::collections::HashMap;
    use std::time::Duration;

    async fn start_static(root: &std::path::Path, workers: usize) -> (HttpServer, SocketAddr) {
        let handler = Arc::new(StaticFiles::new(root));
        let mut server = HttpServer::new(handler, workers);
        server
            .start(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let port = server.listen_port().unwrap();
        (server, SocketAddr::from(([127, 0, 0, 1], port)))
    }

    async fn read_head(stream: &mut TcpStream) -> (u16, HashMap<String, String>, Vec<u8>) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let split = loop {
            if let Some(i) = find_header_end(&buf) {
                break i;
            }
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before the head finished");
            buf.extend_from_slice(&chunk[..n]);
        };
        let head = parse_response_head(&buf[..split]).unwrap();
        (head.code, head.headers.clone(), buf[split..].to_vec())
    }

    /// One full response: head, then exactly Content-Length body bytes.
    async fn read_response(stream: &mut TcpStream) -> (u16, HashMap<String, String>, Vec<u8>) {
        let (code, headers, mut body) = read_head(stream).await;
        let want: usize = headers
            .get("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let mut chunk = [0u8; 1024];
        while body.len() < want {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed mid-body");
            body.extend_from_slice(&chunk[..n]);
        }
        (code, headers, body)
    }

    async fn fixture_root() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("data.bin"), b"0123456789")
            .await
            .unwrap();
        dir
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn full_then_range_on_one_connection() {
        let root = fixture_root().await;
        let (mut server, addr) = start_static(root.path(), 2).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /data.bin HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        let (code, headers, body) = read_response(&mut stream).await;
        assert_eq!(code, 200);
        assert_eq!(headers.get("accept-ranges").map(String::as_str), Some("bytes"));
        assert_eq!(body, b"0123456789");

        // Positive Content-Length means the session stays open.
        stream
            .write_all(b"GET /data.bin HTTP/1.1\r\nRange: bytes=2-5\r\n\r\n")
            .await
            .unwrap();
        let (code, headers, body) = read_response(&mut stream).await;
        assert_eq!(code, 206);
        assert_eq!(
            headers.get("content-range").map(String::as_str),
            Some("bytes 2-5/10")
        );
        assert_eq!(body, b"2345");

        drop(stream);
        server.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn unknown_method_answers_400_and_closes() {
        let root = fixture_root().await;
        let (mut server, addr) = start_static(root.path(), 1).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"BREW /pot HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        let (code, _, body) = read_response(&mut stream).await;
        assert_eq!(code, 400);
        assert!(String::from_utf8_lossy(&body).contains("BAD REQUEST"));
        // Session is gone; the next read sees EOF.
        let mut probe = [0u8; 16];
        assert_eq!(stream.read(&mut probe).await.unwrap(), 0);

        drop(stream);
        server.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn parent_traversal_answers_403() {
        let root = fixture_root().await;
        let (mut server, addr) = start_static(root.path(), 1).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /../etc/passwd HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        let (code, _, _) = read_response(&mut stream).await;
        assert_eq!(code, 403);

        drop(stream);
        server.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn head_advertises_length_without_body() {
        let root = fixture_root().await;
        let (mut server, addr) = start_static(root.path(), 1).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"HEAD /data.bin HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        let (code, headers, leftover) = read_head(&mut stream).await;
        assert_eq!(code, 200);
        assert_eq!(
            headers.get("content-length").map(String::as_str),
            Some("10")
        );
        assert!(leftover.is_empty(), "HEAD must not carry a body");

        // Stream is aligned on a head boundary, so a follow-up GET parses.
        stream
            .write_all(b"GET /data.bin HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        let (code, _, body) = read_response(&mut stream).await;
        assert_eq!(code, 200);
        assert_eq!(body, b"0123456789");

        drop(stream);
        server.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stop_releases_port_and_refuses_new_connections() {
        let root = fixture_root().await;
        let (mut server, addr) = start_static(root.path(), 2).await;
        assert!(server.is_running());

        tokio::time::timeout(Duration::from_secs(5), server.stop())
            .await
            .expect("stop hung");
        assert!(!server.is_running());
        assert!(TcpStream::connect(addr).await.is_err());

        // A fresh server can start afterwards.
        let (mut second, _) = start_static(root.path(), 2).await;
        second.stop().await;
    }
}
