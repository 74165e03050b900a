use std::io::ErrorKind as StdIoErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Remove a file, ignoring a missing file and only logging other failures.
pub async fn remove_file_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(?path, "Removed file"),
        Err(error) if error.kind() == StdIoErrorKind::NotFound => {}
        Err(error) => warn!(?path, %error, "Failed to remove file"),
    }
}

/// A plain file name that stays inside the directory it is joined onto.
pub fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
        && !name.contains("..")
}

/// Reduce a client supplied name to characters safe for paths and headers.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Deletes the file at `path` when dropped.
///
/// Moved into a response body stream so the file goes away once the body is
/// finished or the client hangs up.
#[derive(Debug)]
pub struct RemoveOnDrop {
    path: PathBuf,
}

impl RemoveOnDrop {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = ?self.path, "Removed served file"),
            Err(error) if error.kind() == StdIoErrorKind::NotFound => {}
            Err(error) => warn!(path = ?self.path, %error, "Failed to remove served file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_safe_file_name() {
        assert!(is_safe_file_name("clip_converted.mp4"));
        assert!(is_safe_file_name("my video_converted.webm"));

        assert!(!is_safe_file_name(""));
        assert!(!is_safe_file_name(".."));
        assert!(!is_safe_file_name("../secret"));
        assert!(!is_safe_file_name("a/b.mp4"));
        assert!(!is_safe_file_name("a\\b.mp4"));
        assert!(!is_safe_file_name("clip..mp4"));
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("holiday 2024.mov"), "holiday 2024.mov");
        assert_eq!(sanitize_file_name("a\"b;c.mp4"), "a_b_c.mp4");
        assert_eq!(sanitize_file_name("café.mp3"), "caf_.mp3");
        assert_eq!(sanitize_file_name("  x  "), "x");
    }

    #[test]
    fn test_remove_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("served.bin");
        std::fs::write(&path, b"data").unwrap();

        let guard = RemoveOnDrop::new(path.clone());
        assert!(path.exists());
        drop(guard);
        assert!(!path.exists());

        // already gone is fine
        drop(RemoveOnDrop::new(path));
    }

    #[tokio::test]
    async fn test_remove_file_quietly_ignores_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input");
        tokio::fs::write(&path, b"x").await.unwrap();

        remove_file_quietly(&path).await;
        assert!(!path.exists());
        remove_file_quietly(&path).await;
    }
}
