//! Image fetching, preparation, and caching.
//!
//! This module handles:
//! - Resolving image queries against an upstream catalog
//! - Downloading disk/kernel/initrd artifacts
//! - Running the caller-supplied prepare transform once per catalog id
//! - Journaling prepared and instance records across restarts

mod artifact;
mod catalog;
mod download;
mod guard;
mod journal;
mod layout;
mod vault;

pub use artifact::{Artifact, FetchType};
pub use catalog::{
    CatalogClient, CatalogEntry, CatalogError, CatalogIndex, CatalogInfo, HttpCatalogClient,
    Query, DEFAULT_REMOTE,
};
pub use download::{DownloadError, Downloader, HttpDownloader, ProgressMonitor};
pub use guard::{TentativeDir, TentativeFile};
pub use journal::{
    JournalError, RecordJournal, VaultRecord, INSTANCE_RECORDS_FILE, PREPARED_RECORDS_FILE,
};
pub use layout::{filename_for, CacheLayout, LayoutError};
pub use vault::{ImageVault, Prepare, VaultError};
