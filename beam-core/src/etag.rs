//! Entity tags: a stable non-cryptographic hash of file identity,
//! used for `If-None-Match` validation.

use std::hash::Hasher;
use std::path::Path;
use std::time::SystemTime;

use rustc_hash::FxHasher;

/// ETag for a served file: FxHash of (absolute path, modification time,
/// length) as lowercase hex. Stable while the file is unchanged.
pub fn compute(path: &Path, modified: SystemTime, len: u64) -> String {
    let mut hasher = FxHasher::default();
    hasher.write(path.to_string_lossy().as_bytes());
    let mtime = modified
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    hasher.write_u64(mtime);
    hasher.write_u64(len);
    format!("{:x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn stable_for_same_identity() {
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        let a = compute(Path::new("/tmp/song.mp3"), t, 12345);
        let b = compute(Path::new("/tmp/song.mp3"), t, 12345);
        assert_eq!(a, b);
    }

    #[test]
    fn changes_with_mtime_or_length() {
        let t1 = SystemTime::UNIX_EPOCH + Duration::from_secs(1);
        let t2 = SystemTime::UNIX_EPOCH + Duration::from_secs(2);
        let base = compute(Path::new("/tmp/a"), t1, 10);
        assert_ne!(base, compute(Path::new("/tmp/a"), t2, 10));
        assert_ne!(base, compute(Path::new("/tmp/a"), t1, 11));
        assert_ne!(base, compute(Path::new("/tmp/b"), t1, 10));
    }
}
