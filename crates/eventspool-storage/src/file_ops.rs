//! Filesystem calls that never fail loudly.
//!
//! Every helper here catches the I/O error, logs it with the offending path
//! and returns a sentinel (`false`, `0`, `None`) instead. Callers above this
//! layer decide what a sentinel means for them.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{error, warn};

fn log_failure(op: &'static str, path: &Path, err: &io::Error) {
    if err.kind() == io::ErrorKind::PermissionDenied {
        error!(op, path = %path.display(), error = %err, "permission denied");
    } else {
        warn!(op, path = %path.display(), error = %err, "file operation failed");
    }
}

/// Whether `path` exists.
pub fn exists_safe(path: &Path) -> bool {
    match path.try_exists() {
        Ok(exists) => exists,
        Err(e) => {
            log_failure("exists", path, &e);
            false
        }
    }
}

/// Whether `path` is an existing directory.
pub fn is_dir_safe(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(meta) => meta.is_dir(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            log_failure("is_dir", path, &e);
            false
        }
    }
}

/// Whether `path` is an existing regular file.
pub fn is_file_safe(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(meta) => meta.is_file(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            log_failure("is_file", path, &e);
            false
        }
    }
}

/// Whether the permissions on `path` allow writing.
pub fn can_write_safe(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(meta) => !meta.permissions().readonly(),
        Err(e) => {
            log_failure("can_write", path, &e);
            false
        }
    }
}

/// Size of the file in bytes, 0 when it cannot be read.
pub fn length_safe(path: &Path) -> u64 {
    match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
        Err(e) => {
            log_failure("length", path, &e);
            0
        }
    }
}

/// Creates `path` and all its parents.
pub fn mkdirs_safe(path: &Path) -> bool {
    match fs::create_dir_all(path) {
        Ok(()) => true,
        Err(e) => {
            log_failure("mkdirs", path, &e);
            false
        }
    }
}

/// Removes a file. Returns `false` if it did not exist or could not be removed.
pub fn delete_safe(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            log_failure("delete", path, &e);
            false
        }
    }
}

/// Lists the entries of a directory, `None` if it cannot be listed.
pub fn list_files_safe(dir: &Path) -> Option<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            log_failure("list", dir, &e);
            return None;
        }
    };
    let mut files = Vec::new();
    for entry in entries {
        match entry {
            Ok(entry) => files.push(entry.path()),
            Err(e) => log_failure("list", dir, &e),
        }
    }
    Some(files)
}

/// Reads a whole file, `None` when it cannot be read.
pub fn read_bytes_safe(path: &Path) -> Option<Vec<u8>> {
    match fs::read(path) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            log_failure("read", path, &e);
            None
        }
    }
}

/// Moves a file, falling back to copy-then-delete across filesystems.
///
/// The file ends up in exactly one place: if the source cannot be removed
/// after copying, the copy is removed and `false` is returned.
pub fn move_safe(from: &Path, to: &Path) -> bool {
    if fs::rename(from, to).is_ok() {
        return true;
    }
    if let Err(e) = fs::copy(from, to) {
        log_failure("move", from, &e);
        return false;
    }
    if delete_safe(from) {
        return true;
    }
    warn!(from = %from.display(), to = %to.display(), "source kept after copy, rolling back move");
    delete_safe(to);
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_exists_and_length() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("1000");
        assert!(!exists_safe(&file));
        assert_eq!(length_safe(&file), 0);

        fs::write(&file, b"hello").unwrap();
        assert!(exists_safe(&file));
        assert!(is_file_safe(&file));
        assert!(!is_dir_safe(&file));
        assert_eq!(length_safe(&file), 5);
    }

    #[test]
    fn test_delete_missing_file_returns_false() {
        let dir = tempdir().unwrap();
        assert!(!delete_safe(&dir.path().join("missing")));
    }

    #[test]
    fn test_delete_existing_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("1000");
        fs::write(&file, b"x").unwrap();
        assert!(delete_safe(&file));
        assert!(!exists_safe(&file));
    }

    #[test]
    fn test_list_missing_dir_is_none() {
        let dir = tempdir().unwrap();
        assert!(list_files_safe(&dir.path().join("nope")).is_none());
    }

    #[test]
    fn test_list_and_mkdirs() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        assert!(mkdirs_safe(&nested));
        assert!(is_dir_safe(&nested));
        assert!(can_write_safe(&nested));

        fs::write(nested.join("1"), b"").unwrap();
        fs::write(nested.join("2"), b"").unwrap();
        let mut listed = list_files_safe(&nested).unwrap();
        listed.sort();
        assert_eq!(listed, vec![nested.join("1"), nested.join("2")]);
    }

    #[test]
    fn test_read_missing_is_none() {
        let dir = tempdir().unwrap();
        assert!(read_bytes_safe(&dir.path().join("missing")).is_none());
    }

    #[test]
    fn test_move_file() {
        let dir = tempdir().unwrap();
        let from = dir.path().join("from");
        let to = dir.path().join("to");
        fs::write(&from, b"payload").unwrap();
        assert!(move_safe(&from, &to));
        assert!(!exists_safe(&from));
        assert_eq!(fs::read(&to).unwrap(), b"payload");
    }

    #[test]
    fn test_move_missing_source_fails() {
        let dir = tempdir().unwrap();
        let to = dir.path().join("to");
        assert!(!move_safe(&dir.path().join("missing"), &to));
        assert!(!exists_safe(&to));
    }

    #[cfg(unix)]
    #[test]
    fn test_move_rolls_back_when_source_stays() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let src_dir = dir.path().join("src");
        fs::create_dir(&src_dir).unwrap();
        let from = src_dir.join("from");
        fs::write(&from, b"payload").unwrap();
        // Read-only parent: rename and delete fail, copy succeeds.
        let to = dir.path().join("to");
        fs::set_permissions(&src_dir, fs::Permissions::from_mode(0o555)).unwrap();
        let moved = move_safe(&from, &to);
        fs::set_permissions(&src_dir, fs::Permissions::from_mode(0o755)).unwrap();

        if moved {
            // Permissions are not enforced for root.
            assert!(!exists_safe(&from));
            assert!(exists_safe(&to));
        } else {
            assert!(exists_safe(&from));
            assert!(!exists_safe(&to));
        }
    }
}
