//! MIME type lookup from file extension.

pub const MIME_PLAINTEXT: &str = "text/plain";
pub const MIME_HTML: &str = "text/html";
pub const MIME_DEFAULT_BINARY: &str = "application/octet-stream";

/// MIME type for a file path by extension; unrecognized or missing
/// extensions fall back to the binary default.
pub fn mime_for_path(path: &str) -> &'static str {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let ext = match name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => ext.to_ascii_lowercase(),
        _ => return MIME_DEFAULT_BINARY,
    };
    match ext.as_str() {
        "css" => "text/css",
        "htm" | "html" => "text/html",
        "xml" => "text/xml",
        "java" => "text/x-java-source, text/java",
        "txt" | "asc" => "text/plain",
        "gif" => "image/gif",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "mp3" => "audio/mpeg",
        "m3u" => "audio/mpeg-url",
        "mp4" => "video/mp4",
        "ogv" => "video/ogg",
        "flv" => "video/x-flv",
        "mov" => "video/quicktime",
        "swf" => "application/x-shockwave-flash",
        "js" => "application/javascript",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "ogg" => "application/x-ogg",
        "zip" | "exe" | "class" => MIME_DEFAULT_BINARY,
        _ => MIME_DEFAULT_BINARY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_extensions() {
        assert_eq!(mime_for_path("/music/song.mp3"), "audio/mpeg");
        assert_eq!(mime_for_path("index.HTML"), "text/html");
        assert_eq!(mime_for_path("clip.mp4"), "video/mp4");
        assert_eq!(mime_for_path("notes.txt"), "text/plain");
    }

    #[test]
    fn unknown_or_missing_extension_is_binary() {
        assert_eq!(mime_for_path("archive.xyz"), MIME_DEFAULT_BINARY);
        assert_eq!(mime_for_path("README"), MIME_DEFAULT_BINARY);
        assert_eq!(mime_for_path("trailing."), MIME_DEFAULT_BINARY);
    }

    #[test]
    fn extension_taken_from_final_segment() {
        assert_eq!(mime_for_path("/a.mp3/readme"), MIME_DEFAULT_BINARY);
    }
}
