//! Durable journal of vault records.
//!
//! Each journal is a single JSON object mapping a string key (catalog id or
//! instance name) to a record. The journal is a cache, not an authority:
//! loading tolerates a missing, unreadable, or malformed file by starting
//! empty. Writing is atomic: serialize the whole table, write a sibling
//! temp file, fsync, rename. A crash mid-write can never leave a
//! half-journal behind for the next load to discard.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::artifact::Artifact;
use super::catalog::Query;

/// Journal of prepared images, keyed by catalog id.
pub const PREPARED_RECORDS_FILE: &str = "multipassd-image-records.json";
/// Journal of instance copies, keyed by instance name.
pub const INSTANCE_RECORDS_FILE: &str = "multipassd-instance-image-records.json";

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("failed to encode journal: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write journal {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What the vault knows about one artifact: the files on disk and the query
/// that produced them. The query's `name` is not persisted; the journal key
/// is authoritative for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultRecord {
    pub image: Artifact,
    pub query: Query,
}

/// One on-disk table of records.
#[derive(Debug, Clone)]
pub struct RecordJournal {
    path: PathBuf,
}

impl RecordJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the table. Any failure (absent file, I/O error, parse error at
    /// any level, a record that fails validation) yields an empty table.
    /// Lossy but atomic; the vault rebuilds over time.
    pub fn load(&self) -> HashMap<String, VaultRecord> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(error) => {
                if error.kind() != io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), %error, "journal unreadable, starting empty");
                }
                return HashMap::new();
            }
        };
        match serde_json::from_slice::<HashMap<String, VaultRecord>>(&bytes) {
            Ok(records) => {
                debug!(path = %self.path.display(), count = records.len(), "journal loaded");
                records
            }
            Err(error) => {
                warn!(path = %self.path.display(), %error, "journal malformed, starting empty");
                HashMap::new()
            }
        }
    }

    /// Rewrite the whole table atomically.
    pub fn store(&self, records: &HashMap<String, VaultRecord>) -> Result<(), JournalError> {
        let encoded = serde_json::to_string_pretty(records)?;
        let tmp = self.path.with_extension("tmp");

        let mut file = File::create(&tmp).map_err(|source| JournalError::Io {
            path: tmp.clone(),
            source,
        })?;
        file.write_all(encoded.as_bytes())
            .map_err(|source| JournalError::Io {
                path: tmp.clone(),
                source,
            })?;
        file.sync_all().map_err(|source| JournalError::Io {
            path: tmp.clone(),
            source,
        })?;
        drop(file);

        fs::rename(&tmp, &self.path).map_err(|source| JournalError::Io {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), count = records.len(), "journal persisted");
        Ok(())
    }
}
