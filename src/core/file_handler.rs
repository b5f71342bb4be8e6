use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use tracing::{debug, info};

use crate::core::error::FilesystemError;
use crate::core::models::ResolvedPath;

/// Normalize a path to forward slashes and pull out its last segment.
///
/// Backslashes become `/` regardless of host OS, since the processing service
/// expects that convention. The filename is the last non-empty segment, so a
/// trailing separator does not produce an empty name. Empty input (or `/`)
/// yields an empty filename.
pub fn resolve(path: &str) -> ResolvedPath {
    let canonical_path = path.replace('\\', "/");
    let filename = canonical_path
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or_default()
        .to_string();

    ResolvedPath {
        canonical_path,
        filename,
    }
}

/// Create the destination directory (and parents) if it is missing.
pub fn ensure_destination(path: &Path) -> Result<(), FilesystemError> {
    if path.is_dir() {
        debug!(path = %path.display(), "Destination directory already exists");
        return Ok(());
    }
    fs::create_dir_all(path).map_err(|e| FilesystemError::new(path, e))?;
    info!(path = %path.display(), "Created destination directory");
    Ok(())
}

/// Write file content to disk, replacing whatever was there.
pub fn write_file_content(path: &Path, content: &[u8]) -> Result<(), FilesystemError> {
    let mut file = File::create(path).map_err(|e| FilesystemError::new(path, e))?;
    file.write_all(content)
        .and_then(|_| file.sync_all())
        .map_err(|e| FilesystemError::new(path, e))?;
    Ok(())
}

/// Remove a file, returning whether it existed.
pub fn remove_file_if_exists(path: &Path) -> Result<bool, FilesystemError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory) => {
            Ok(false)
        }
        Err(e) => Err(FilesystemError::new(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_forward_slashes() {
        let resolved = resolve("a/b/c.wav");
        assert_eq!(resolved.canonical_path, "a/b/c.wav");
        assert_eq!(resolved.filename, "c.wav");
    }

    #[test]
    fn test_resolve_backslashes() {
        let resolved = resolve("a\\b\\c.wav");
        assert_eq!(resolved.canonical_path, "a/b/c.wav");
        assert_eq!(resolved.filename, "c.wav");
    }

    #[test]
    fn test_resolve_mixed_and_absolute() {
        let resolved = resolve("C:\\incoming/today\\note.wav");
        assert_eq!(resolved.canonical_path, "C:/incoming/today/note.wav");
        assert_eq!(resolved.filename, "note.wav");

        let resolved = resolve("/srv/incoming/note.wav");
        assert_eq!(resolved.filename, "note.wav");
    }

    #[test]
    fn test_resolve_edge_cases() {
        assert_eq!(resolve("").filename, "");
        assert_eq!(resolve("").canonical_path, "");
        assert_eq!(resolve("/").filename, "");
        assert_eq!(resolve("note.wav").filename, "note.wav");
        assert_eq!(resolve("a/b/").filename, "b");
    }

    #[test]
    fn test_resolve_is_idempotent() {
        for path in ["", "/", "a\\b\\c.wav", "x/y\\z", "\\\\server\\share\\f.mp3", "plain"] {
            let once = resolve(path).canonical_path;
            let twice = resolve(&once).canonical_path;
            assert_eq!(once, twice, "not a fixed point for {path:?}");
            assert!(!once.contains('\\'));
        }
    }

    #[test]
    fn test_ensure_destination_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("nested").join("chunks");

        ensure_destination(&dest).unwrap();
        assert!(dest.is_dir());
        ensure_destination(&dest).unwrap();
        assert!(dest.is_dir());
    }

    #[test]
    fn test_ensure_destination_fails_on_file() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, b"x").unwrap();

        let err = ensure_destination(&blocker.join("chunks")).unwrap_err();
        assert_eq!(err.path, blocker.join("chunks"));
    }

    #[test]
    fn test_write_file_content_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out.txt");

        write_file_content(&path, b"first").unwrap();
        write_file_content(&path, b"second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
    }

    #[test]
    fn test_remove_file_if_exists() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("old.txt");
        fs::write(&path, b"stale").unwrap();

        assert!(remove_file_if_exists(&path).unwrap());
        assert!(!path.exists());
        assert!(!remove_file_if_exists(&path).unwrap());
    }
}
