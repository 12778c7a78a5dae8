//! On-disk layout of the cache directory.
//!
//! The cache root holds one subdirectory per prepared image, named
//! `<release>-<version>`, and one per instance, named after the instance.
//! Files inside keep the basename of the URL (or prepared file) they came
//! from.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

/// Filesystem errors, carrying the offending path(s).
#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("directory already exists: {}", .path.display())]
    AlreadyExists { path: PathBuf },

    #[error("unable to create directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to copy {} to {}: {source}", .from.display(), .to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to remove {}: {source}", .path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Path policy for a single cache root.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the directory for a prepared image. An existing directory is
    /// an error: the same release/version should never be fetched twice
    /// while its record is live.
    pub fn image_dir(&self, release: &str, version: &str) -> Result<PathBuf, LayoutError> {
        self.create_subdir(&format!("{release}-{version}"))
    }

    /// Create the directory for an instance copy. A leftover directory is
    /// accepted if it is empty; one with contents is still an error.
    pub fn instance_dir(&self, name: &str) -> Result<PathBuf, LayoutError> {
        match self.create_subdir(name) {
            Err(LayoutError::AlreadyExists { path }) => {
                let empty = fs::read_dir(&path)
                    .map(|mut entries| entries.next().is_none())
                    .unwrap_or(false);
                if empty {
                    debug!(path = %path.display(), "reusing existing empty instance directory");
                    Ok(path)
                } else {
                    Err(LayoutError::AlreadyExists { path })
                }
            }
            other => other,
        }
    }

    fn create_subdir(&self, name: &str) -> Result<PathBuf, LayoutError> {
        if let Err(source) = fs::create_dir_all(&self.root) {
            return Err(LayoutError::CreateDir {
                path: self.root.clone(),
                source,
            });
        }
        let dir = self.root.join(name);
        match fs::create_dir(&dir) {
            Ok(()) => {
                debug!(path = %dir.display(), "created cache subdirectory");
                Ok(dir)
            }
            Err(source) if source.kind() == ErrorKind::AlreadyExists => {
                Err(LayoutError::AlreadyExists { path: dir })
            }
            Err(source) => Err(LayoutError::CreateDir { path: dir, source }),
        }
    }

    /// Plain file copy into `dir`, preserving the basename. Instance copies
    /// are deliberately not hard- or reflinked so callers may mutate them.
    pub fn copy_into(&self, file: &Path, dir: &Path) -> Result<PathBuf, LayoutError> {
        let name = file.file_name().ok_or_else(|| LayoutError::Copy {
            from: file.to_path_buf(),
            to: dir.to_path_buf(),
            source: io::Error::new(ErrorKind::InvalidInput, "source has no file name"),
        })?;
        let dest = dir.join(name);
        fs::copy(file, &dest).map_err(|source| LayoutError::Copy {
            from: file.to_path_buf(),
            to: dest.clone(),
            source,
        })?;
        Ok(dest)
    }

    /// Remove a file; a path that is already gone is fine.
    pub fn remove_file(&self, path: &Path) -> Result<(), LayoutError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(source) if source.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(LayoutError::Remove {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Remove an instance directory, non-recursively. The directory is
    /// expected to be empty by now; anything else is logged and left alone.
    pub fn remove_instance_dir(&self, name: &str) {
        let dir = self.root.join(name);
        match fs::remove_dir(&dir) {
            Ok(()) => debug!(path = %dir.display(), "removed instance directory"),
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => {
                warn!(path = %dir.display(), %error, "could not remove instance directory")
            }
        }
    }
}

/// Basename of a URL's path component, query string and fragment stripped.
pub fn filename_for(url: &str) -> String {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let without_query = without_fragment.split('?').next().unwrap_or(without_fragment);
    without_query
        .rsplit('/')
        .next()
        .unwrap_or(without_query)
        .to_string()
}
