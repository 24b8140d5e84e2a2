//! Response-head encoding (server side) and response-head decoding
//! (client side of the download engine).

use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;

/// Response status codes used by the transfer engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Created,
    Accepted,
    NoContent,
    PartialContent,
    Redirect,
    NotModified,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    RangeNotSatisfiable,
    InternalError,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::Created => 201,
            Status::Accepted => 202,
            Status::NoContent => 204,
            Status::PartialContent => 206,
            Status::Redirect => 301,
            Status::NotModified => 304,
            Status::BadRequest => 400,
            Status::Unauthorized => 401,
            Status::Forbidden => 403,
            Status::NotFound => 404,
            Status::RangeNotSatisfiable => 416,
            Status::InternalError => 500,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Created => "Created",
            Status::Accepted => "Accepted",
            Status::NoContent => "No Content",
            Status::PartialContent => "Partial Content",
            Status::Redirect => "Moved Permanently",
            Status::NotModified => "Not Modified",
            Status::BadRequest => "Bad Request",
            Status::Unauthorized => "Unauthorized",
            Status::Forbidden => "Forbidden",
            Status::NotFound => "Not Found",
            Status::RangeNotSatisfiable => "Requested Range Not Satisfiable",
            Status::InternalError => "Internal Server Error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.reason())
    }
}

/// Structured request failure: the status the session answers with plus a
/// plaintext message for the body. Terminates the session, never the server.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{status}: {message}")]
pub struct HttpError {
    pub status: Status,
    pub message: String,
}

impl HttpError {
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Status::InternalError, message)
    }
}

/// Serialize a response head: status line, Content-Type, Date (unless one of
/// the custom headers already carries it), custom headers, then keep-alive +
/// Content-Length when the body length is known and positive. A missing or
/// zero length omits both, signalling close-after-send. Ends with the blank
/// line; the body is streamed separately.
pub fn encode_response_head(
    status: Status,
    mime: Option<&str>,
    headers: &[(String, String)],
    content_length: Option<u64>,
) -> Vec<u8> {
    let mut out = format!("HTTP/1.1 {}\r\n", status);
    if let Some(mime) = mime {
        out.push_str("Content-Type: ");
        out.push_str(mime);
        out.push_str("\r\n");
    }
    if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("date")) {
        out.push_str("Date: ");
        out.push_str(&httpdate::fmt_http_date(SystemTime::now()));
        out.push_str("\r\n");
    }
    for (name, value) in headers {
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    match content_length {
        Some(n) if n > 0 => {
            out.push_str("Connection: keep-alive\r\n");
            out.push_str(&format!("Content-Length: {}\r\n", n));
        }
        _ => {}
    }
    out.push_str("\r\n");
    out.into_bytes()
}

/// Decoded response head as seen by the download engine.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub code: u16,
    pub headers: HashMap<String, String>,
}

impl ResponseHead {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }

    /// Declared body length; absent or unparsable means 0 ("read until the
    /// stream closes").
    pub fn content_length(&self) -> u64 {
        self.header("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }
}

/// Error decoding a response head.
#[derive(Debug, thiserror::Error)]
pub enum ResponseHeadError {
    #[error("malformed status line")]
    MalformedStatusLine,
}

/// Parse a response head: `HTTP/1.1 <code> <reason>` then header lines with
/// the same rules as the request side (lowercased names, colon-less lines
/// skipped, blank line terminates).
pub fn parse_response_head(head: &[u8]) -> Result<ResponseHead, ResponseHeadError> {
    let text = String::from_utf8_lossy(head);
    let mut lines = text.lines();
    let status_line = lines.next().unwrap_or("");
    let mut tokens = status_line.split_whitespace();
    let version = tokens.next().unwrap_or("");
    if !version.starts_with("HTTP/") {
        return Err(ResponseHeadError::MalformedStatusLine);
    }
    let code: u16 = tokens
        .next()
        .and_then(|t| t.parse().ok())
        .ok_or(ResponseHeadError::MalformedStatusLine)?;

    let mut headers = HashMap::new();
    for line in lines {
        if line.trim().is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(
                name.trim().to_ascii_lowercase(),
                value.trim().to_string(),
            );
        }
    }
    Ok(ResponseHead { code, headers })
}
