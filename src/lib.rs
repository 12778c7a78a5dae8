//! VM image vault
//!
//! A content-addressed, two-tier cache mapping image queries to prepared
//! disk artifacts and per-instance copies, for a daemon that provisions
//! lightweight local VMs.
//!
//! ## Architecture
//!
//! ```text
//! fetch_image(query)
//! ├── instance table hit?   → return recorded artifact
//! ├── catalog resolve       → catalog id
//! ├── prepared table hit?   → copy into instance dir, journal, return
//! └── miss                  → download → prepare → publish both records
//!                             → sweep stale prepared entries → journal
//! ```
//!
//! Both tables are journaled as JSON files in the cache directory and
//! reloaded on startup; corrupt journals start empty rather than failing.
//! Partially written artifacts are tracked by scoped guards and removed on
//! any error path, so no record ever points at a half-written file.
//!
//! ## Modules
//!
//! - `image`: catalog resolution, download, prepare, caching, journaling
//! - `config`: environment-driven configuration for the HTTP collaborators

pub mod config;
pub mod image;

// Re-export commonly used types
pub use config::VaultConfig;
pub use image::{
    Artifact, CatalogClient, CatalogError, CatalogInfo, Downloader, FetchType, ImageVault, Query,
    VaultError,
};
