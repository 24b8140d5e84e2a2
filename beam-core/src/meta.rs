//! Metadata document: the well-known descriptor fetched ahead of the
//! payload in a two-phase transfer. Plaintext `key :value` lines,
//! blank-line terminated.

use std::collections::HashMap;

/// Well-known name of the metadata document, relative to the server root.
pub const META_FILE_NAME: &str = "metaFile.html";

pub const META_KEY_DATA: &str = "data";
pub const META_KEY_TITLE: &str = "title";
pub const META_KEY_SIZE: &str = "size";
pub const META_KEY_MIMETYPE: &str = "mimetype";

/// Parse `key :value` lines into a mapping. Keys are lowercased and
/// trimmed, values trimmed; lines without a colon are skipped and the
/// first blank line terminates the document.
pub fn parse_meta_entries(text: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            out.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
    out
}

/// Parsed metadata describing the real payload of a transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaDocument {
    /// Path of the payload on the sharing device.
    pub data: String,
    pub title: String,
    pub size: u64,
    pub mimetype: String,
}

impl MetaDocument {
    pub fn from_entries(entries: &HashMap<String, String>) -> Self {
        Self {
            data: entries.get(META_KEY_DATA).cloned().unwrap_or_default(),
            title: entries.get(META_KEY_TITLE).cloned().unwrap_or_default(),
            size: entries
                .get(META_KEY_SIZE)
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            mimetype: entries.get(META_KEY_MIMETYPE).cloned().unwrap_or_default(),
        }
    }

    pub fn parse(text: &str) -> Self {
        Self::from_entries(&parse_meta_entries(text))
    }

    /// Serialize for publishing on the serving side.
    pub fn encode(&self) -> String {
        format!(
            "{} :{}\r\n{} :{}\r\n{} :{}\r\n{} :{}\r\n\r\n",
            META_KEY_DATA,
            self.data,
            META_KEY_TITLE,
            self.title,
            META_KEY_SIZE,
            self.size,
            META_KEY_MIMETYPE,
            self.mimetype,
        )
    }
}

/// Final path segment with any query string stripped.
pub fn file_name(path: &str) -> &str {
    let path = path.split('?').next().unwrap_or(path);
    match path.rfind('/') {
        Some(i) => &path[i + 1..],
        None => path,
    }
}
