//! Directory-rooted static file handler: traversal protection, MIME
//! lookup, conditional (ETag) and partial (Range) answers.

use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::SystemTime;

use async_trait::async_trait;
use beam_core::{etag, mime, parse_range_header, range, HttpError, Request, RangeOutcome, Status};
use tokio::io::AsyncSeekExt;

use crate::server::{Body, RequestHandler, Response};

pub struct StaticFiles {
    root: PathBuf,
    /// Root-relative prefixes never served, e.g. internal state files.
    deny_prefixes: Vec<String>,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            deny_prefixes: Vec::new(),
        }
    }

    pub fn deny_prefix(mut self, prefix: &str) -> Self {
        self.deny_prefixes
            .push(prefix.trim_start_matches('/').to_string());
        self
    }

    async fn serve_file(&self, request: &Request) -> Response {
        if !self.root.is_dir() {
            return Response::text(
                Status::InternalError,
                "INTERNAL ERROR: given serve root is not a directory.",
            );
        }

        // The parser already strips the query and rejects `..`; re-check
        // here so the handler stays safe behind any front end.
        let mut uri = request.uri.trim().replace('\\', "/");
        if let Some(q) = uri.find('?') {
            uri.truncate(q);
        }
        if uri.split('/').any(|seg| seg == "..") {
            return Response::text(
                Status::Forbidden,
                "FORBIDDEN: Won't serve ../ for security reasons.",
            );
        }
        let rel = uri.trim_start_matches('/');
        if !rel.is_empty() && self.deny_prefixes.iter().any(|p| rel.starts_with(p.as_str())) {
            return Response::text(Status::Forbidden, "FORBIDDEN: restricted path.");
        }

        let path = self.root.join(rel);
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_file() => m,
            _ => return Response::text(Status::NotFound, "Error 404, file not found."),
        };
        let file_len = metadata.len();
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let tag = etag::compute(&path, modified, file_len);
        let mime_type = mime::mime_for_path(&uri);

        let parsed_range = request.header("range").and_then(parse_range_header);
        let response = if let Some(byte_range) = parsed_range {
            // A Range request is answered on the range alone; If-None-Match
            // only short-circuits full requests.
            match range::resolve(byte_range, file_len) {
                RangeOutcome::NotSatisfiable => {
                    Response::text(Status::RangeNotSatisfiable, "")
                        .with_header("Content-Range", &format!("bytes 0-0/{file_len}"))
                        .with_header("ETag", &tag)
                }
                RangeOutcome::Window { start, end, len } => {
                    let mut file = match tokio::fs::File::open(&path).await {
                        Ok(f) => f,
                        Err(_) => {
                            return Response::text(Status::Forbidden, "FORBIDDEN: Reading file failed.")
                        }
                    };
                    if file.seek(SeekFrom::Start(start)).await.is_err() {
                        return Response::text(Status::Forbidden, "FORBIDDEN: Reading file failed.");
                    }
                    Response::new(Status::PartialContent, mime_type, Body::File { file, len })
                        .with_header("Content-Range", &format!("bytes {start}-{end}/{file_len}"))
                        .with_header("ETag", &tag)
                }
            }
        } else if request.header("if-none-match") == Some(tag.as_str()) {
            Response::new(Status::NotModified, mime_type, Body::Empty).with_header("ETag", &tag)
        } else {
            match tokio::fs::File::open(&path).await {
                Ok(file) => Response::new(Status::Ok, mime_type, Body::File { file, len: file_len })
                    .with_header("ETag", &tag),
                Err(_) => Response::text(Status::Forbidden, "FORBIDDEN: Reading file failed."),
            }
        };
        response.with_header("Accept-Ranges", "bytes")
    }
}

#[async_trait]
impl RequestHandler for StaticFiles {
    async fn serve(&self, request: &Request) -> Result<Response, HttpError> {
        tracing::info!(method = request.method.as_str(), uri = %request.uri, "serve");
        Ok(self.serve_file(request).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beam_core::Method;
    use std::collections::HashMap;
    use tokio::io::AsyncReadExt;

    fn request(uri: &str, headers: &[(&str, &str)]) -> Request {
        Request {
            method: Method::Get,
            uri: uri.to_string(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
                .collect(),
            parameters: HashMap::new(),
            raw_query: String::new(),
        }
    }

    fn header<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
        response
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    async fn body_bytes(body: Body) -> Vec<u8> {
        match body {
            Body::Empty => Vec::new(),
            Body::Bytes(bytes) => bytes,
            Body::File { mut file, len } => {
                let mut out = vec![0u8; len as usize];
                file.read_exact(&mut out).await.unwrap();
                out
            }
        }
    }

    async fn fixture() -> (tempfile::TempDir, StaticFiles) {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("data.bin"), b"0123456789")
            .await
            .unwrap();
        let handler = StaticFiles::new(dir.path());
        (dir, handler)
    }

    #[tokio::test]
    async fn full_file_with_etag_and_length() {
        let (_dir, handler) = fixture().await;
        let response = handler.serve_file(&request("/data.bin", &[])).await;
        assert_eq!(response.status, Status::Ok);
        assert_eq!(header(&response, "Accept-Ranges"), Some("bytes"));
        assert!(header(&response, "ETag").is_some());
        assert_eq!(body_bytes(response.body).await, b"0123456789");
    }

    #[tokio::test]
    async fn range_window_is_partial_content() {
        let (_dir, handler) = fixture().await;
        let response = handler
            .serve_file(&request("/data.bin", &[("range", "bytes=0-4")]))
            .await;
        assert_eq!(response.status, Status::PartialContent);
        assert_eq!(header(&response, "Content-Range"), Some("bytes 0-4/10"));
        assert_eq!(body_bytes(response.body).await, b"01234");
    }

    #[tokio::test]
    async fn open_ended_range_runs_to_eof() {
        let (_dir, handler) = fixture().await;
        let response = handler
            .serve_file(&request("/data.bin", &[("range", "bytes=6-")]))
            .await;
        assert_eq!(response.status, Status::PartialContent);
        assert_eq!(header(&response, "Content-Range"), Some("bytes 6-9/10"));
        assert_eq!(body_bytes(response.body).await, b"6789");
    }

    #[tokio::test]
    async fn range_past_eof_not_satisfiable() {
        let (_dir, handler) = fixture().await;
        let response = handler
            .serve_file(&request("/data.bin", &[("range", "bytes=20-")]))
            .await;
        assert_eq!(response.status, Status::RangeNotSatisfiable);
        assert_eq!(header(&response, "Content-Range"), Some("bytes 0-0/10"));
    }

    #[tokio::test]
    async fn matching_etag_is_not_modified() {
        let (_dir, handler) = fixture().await;
        let first = handler.serve_file(&request("/data.bin", &[])).await;
        let tag = header(&first, "ETag").unwrap().to_string();

        let second = handler
            .serve_file(&request("/data.bin", &[("if-none-match", &tag)]))
            .await;
        assert_eq!(second.status, Status::NotModified);
        assert!(second.body.is_empty());

        // Unchanged file: the conditional answer repeats.
        let third = handler
            .serve_file(&request("/data.bin", &[("if-none-match", &tag)]))
            .await;
        assert_eq!(third.status, Status::NotModified);
    }

    #[tokio::test]
    async fn range_wins_over_if_none_match() {
        let (_dir, handler) = fixture().await;
        let first = handler.serve_file(&request("/data.bin", &[])).await;
        let tag = header(&first, "ETag").unwrap().to_string();
        let response = handler
            .serve_file(&request(
                "/data.bin",
                &[("if-none-match", &tag), ("range", "bytes=0-4")],
            ))
            .await;
        assert_eq!(response.status, Status::PartialContent);
    }

    #[tokio::test]
    async fn parent_segment_is_forbidden() {
        let (_dir, handler) = fixture().await;
        let response = handler.serve_file(&request("/../etc/passwd", &[])).await;
        assert_eq!(response.status, Status::Forbidden);
    }

    #[tokio::test]
    async fn denied_prefix_is_forbidden() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("state.toml"), b"secret")
            .await
            .unwrap();
        let handler = StaticFiles::new(dir.path()).deny_prefix("state");
        let response = handler.serve_file(&request("/state.toml", &[])).await;
        assert_eq!(response.status, Status::Forbidden);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let (_dir, handler) = fixture().await;
        let response = handler.serve_file(&request("/nope.mp3", &[])).await;
        assert_eq!(response.status, Status::NotFound);
    }

    #[tokio::test]
    async fn bad_root_is_internal_error() {
        let handler = StaticFiles::new("/definitely/not/a/dir");
        let response = handler.serve_file(&request("/x", &[])).await;
        assert_eq!(response.status, Status::InternalError);
    }
}
