//! Request-head decoding: header-block detection over partial reads,
//! request-line and header parsing, query parameter decoding.

use std::collections::HashMap;

use crate::response::{HttpError, Status};

/// Fixed head buffer size. The full header block must fit in here across
/// however many partial reads it takes (Apache's default header limit is 8 KiB).
pub const HEADER_BUF_SIZE: usize = 8192;

/// Recognized request methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
    Head,
}

impl Method {
    /// Case-insensitive lookup; unknown tokens are a request syntax error.
    pub fn lookup(token: &str) -> Option<Method> {
        match token.to_ascii_uppercase().as_str() {
            "GET" => Some(Method::Get),
            "PUT" => Some(Method::Put),
            "POST" => Some(Method::Post),
            "DELETE" => Some(Method::Delete),
            "HEAD" => Some(Method::Head),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
        }
    }
}

/// One decoded request head. Headers are lowercased, last occurrence wins;
/// parameters keep every value of a repeated key in order of appearance.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Percent-decoded path with the query string already stripped.
    /// Never contains a `..` segment; such requests are rejected at parse.
    pub uri: String,
    pub headers: HashMap<String, String>,
    pub parameters: HashMap<String, Vec<String>>,
    pub raw_query: String,
}

impl Request {
    /// Header lookup by lowercased name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }
}

/// Index one past the CR LF CR LF header terminator, if present.
/// The caller accumulates partial reads and retries until this hits
/// or the head buffer fills.
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Percent-decode a URI token; `+` decodes to space. Invalid escape
/// sequences pass through unchanged rather than failing the request.
pub fn decode_percent(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                match (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi << 4) | lo);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Decode a query (or form body) string: pairs split on `&`, each on the
/// first `=`. Keys are percent-decoded and trimmed; a key without `=` maps
/// to an empty value; repeated keys accumulate in order.
pub fn decode_parameters(query: &str) -> HashMap<String, Vec<String>> {
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = match pair.split_once('=') {
            Some((k, v)) => (k, Some(v)),
            None => (pair, None),
        };
        let key = decode_percent(key).trim().to_string();
        let value = value.map(decode_percent).unwrap_or_default();
        out.entry(key).or_default().push(value);
    }
    out
}

fn has_parent_segment(path: &str) -> bool {
    path.split(['/', '\\']).any(|seg| seg == "..")
}

/// Parse one complete request head (request line + header lines, blank-line
/// terminated). Malformed header lines without a colon are skipped; a bad
/// request line or an unknown method is a 400; a `..` path segment is a 403.
pub fn parse_request_head(head: &[u8]) -> Result<Request, HttpError> {
    let text = String::from_utf8_lossy(head);
    let mut lines = text.lines();
    let request_line = lines.next().unwrap_or("");
    let mut tokens = request_line.split_whitespace();

    let method_token = tokens
        .next()
        .ok_or_else(|| HttpError::new(Status::BadRequest, "BAD REQUEST: Syntax error."))?;
    let method = Method::lookup(method_token)
        .ok_or_else(|| HttpError::new(Status::BadRequest, "BAD REQUEST: Syntax error."))?;

    let raw_uri = tokens
        .next()
        .ok_or_else(|| HttpError::new(Status::BadRequest, "BAD REQUEST: Missing URI."))?;

    let (path, raw_query) = match raw_uri.split_once('?') {
        Some((p, q)) => (p, q.to_string()),
        None => (raw_uri, String::new()),
    };
    let uri = decode_percent(path);
    if has_parent_segment(&uri) {
        return Err(HttpError::new(
            Status::Forbidden,
            "FORBIDDEN: Won't serve ../ for security reasons.",
        ));
    }
    let parameters = decode_parameters(&raw_query);

    let mut headers = HashMap::new();
    for line in lines {
        if line.trim().is_empty() {
            break;
        }
        // Lines without a colon are silently skipped.
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(
                name.trim().to_ascii_lowercase(),
                value.trim().to_string(),
            );
        }
    }

    Ok(Request {
        method,
        uri,
        headers,
        parameters,
        raw_query,
    })
}
