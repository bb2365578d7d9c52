//! Recursive directory listing.

use std::io;
use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

/// Every regular file below `dir`, sorted by path. Hidden entries (names
/// starting with `.`, which includes in-flight temporary files) are
/// skipped, along with everything beneath them.
///
/// # Errors
///
/// Returns the first I/O error encountered while reading directories.
pub fn files_under(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
    {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

/// Files below `dir` whose extension is `extension` (case-sensitive).
///
/// # Errors
///
/// See [`files_under`].
pub fn files_with_extension(dir: &Path, extension: &str) -> io::Result<Vec<PathBuf>> {
    Ok(files_under(dir)?
        .into_iter()
        .filter(|p| has_extension(p, extension))
        .collect())
}

/// Returns `true` if `path` ends in `.{extension}`.
#[must_use]
pub fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension().is_some_and(|e| e == extension)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn lists_nested_files_sorted_without_hidden() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("b/c")).unwrap();
        fs::write(root.join("b/c/z.npy"), b"").unwrap();
        fs::write(root.join("a.svg"), b"").unwrap();
        fs::write(root.join("b/.tmpXYZ"), b"").unwrap();
        fs::create_dir_all(root.join(".cache")).unwrap();
        fs::write(root.join(".cache/old.npy"), b"").unwrap();
        fs::write(root.join("b.npy"), b"").unwrap();

        let files = files_under(root).unwrap();
        assert_eq!(files, [root.join("a.svg"), root.join("b/c/z.npy"), root.join("b.npy")]);
        assert_eq!(
            files_with_extension(root, "npy").unwrap(),
            [root.join("b/c/z.npy"), root.join("b.npy")]
        );
    }

    #[test]
    fn hidden_root_is_still_walked() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join(".staging");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("x.npy"), b"").unwrap();
        assert_eq!(files_under(&root).unwrap(), [root.join("x.npy")]);
    }

    #[test]
    fn missing_directory_is_an_error() {
        assert!(files_under(Path::new("/nonexistent/crownscan")).is_err());
    }
}
