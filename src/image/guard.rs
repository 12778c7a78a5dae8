//! Scoped guards for files and directories that are not yet owned by a
//! committed record.
//!
//! A guard removes its path when dropped while still armed; `release`
//! disarms it. The success path releases every guard just before the
//! record that adopts the files is published, so any early return via `?`
//! reclaims everything written so far.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// A file that exists (or is about to exist) but is not yet referenced by
/// any record.
#[derive(Debug)]
pub struct TentativeFile {
    path: PathBuf,
    armed: bool,
}

impl TentativeFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Disarm the guard; the file has been adopted by a committed record.
    pub fn release(mut self) {
        self.armed = false;
    }
}

impl Drop for TentativeFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed tentative file"),
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => {
                warn!(path = %self.path.display(), %error, "could not remove tentative file")
            }
        }
    }
}

/// A directory created for artifacts that are not yet committed. Removal is
/// non-recursive; file guards inside it must drop first.
#[derive(Debug)]
pub struct TentativeDir {
    path: PathBuf,
    armed: bool,
}

impl TentativeDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            armed: true,
        }
    }

    pub fn release(mut self) {
        self.armed = false;
    }
}

impl Drop for TentativeDir {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match fs::remove_dir(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed tentative directory"),
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => {
                warn!(path = %self.path.display(), %error, "could not remove tentative directory")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_guard_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.img");
        fs::write(&path, b"partial").unwrap();

        drop(TentativeFile::new(&path));
        assert!(!path.exists());
    }

    #[test]
    fn released_guard_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("committed.img");
        fs::write(&path, b"whole").unwrap();

        TentativeFile::new(&path).release();
        assert!(path.exists());
    }

    #[test]
    fn dropping_guard_for_missing_file_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        drop(TentativeFile::new(dir.path().join("never-written")));
    }

    #[test]
    fn dir_guard_composes_with_file_guards() {
        let dir = tempfile::tempdir().unwrap();
        let image_dir = dir.path().join("18.04-1");
        fs::create_dir(&image_dir).unwrap();
        let file = image_dir.join("img.img");
        fs::write(&file, b"42").unwrap();

        // Declaration order matters: the file guard drops first, emptying
        // the directory so the dir guard can remove it.
        let dir_guard = TentativeDir::new(&image_dir);
        let file_guard = TentativeFile::new(&file);
        drop(file_guard);
        drop(dir_guard);

        assert!(!file.exists());
        assert!(!image_dir.exists());
    }
}
