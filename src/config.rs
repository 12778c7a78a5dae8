use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub cache_dir: PathBuf,
    pub catalog_url: String,
    pub download_timeout: Duration,
}

impl VaultConfig {
    pub fn from_env() -> Result<Self> {
        let cache_dir = std::env::var("VAULT_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/var/lib/vm-image-vault/cache"));

        let catalog_url = std::env::var("VAULT_CATALOG_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8080/v1/images".to_string());

        let download_timeout = match std::env::var("VAULT_DOWNLOAD_TIMEOUT_SECS") {
            Ok(raw) => Duration::from_secs(
                raw.parse()
                    .context("VAULT_DOWNLOAD_TIMEOUT_SECS is not a number of seconds")?,
            ),
            Err(_) => Duration::from_secs(1800),
        };

        Ok(Self {
            cache_dir,
            catalog_url,
            download_timeout,
        })
    }
}
