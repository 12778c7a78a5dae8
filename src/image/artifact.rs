//! Artifact types shared across the vault.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// What a fetch should bring down from the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchType {
    /// Only the disk image.
    ImageOnly,
    /// Disk image plus kernel and initrd, for hypervisors that boot them
    /// directly.
    ImageKernelAndInitrd,
}

/// A prepared or instance-local image: the disk image path, optional kernel
/// and initrd siblings, and the catalog id that identifies the content.
///
/// On the journal wire an absent kernel/initrd is an empty string; a missing
/// key parses the same way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(rename = "path")]
    pub image_path: PathBuf,
    #[serde(default, with = "opt_path")]
    pub kernel_path: Option<PathBuf>,
    #[serde(default, with = "opt_path")]
    pub initrd_path: Option<PathBuf>,
    #[serde(default)]
    pub id: String,
}

impl Artifact {
    /// An artifact holding only the disk image path.
    pub fn image_only(image_path: impl Into<PathBuf>, id: impl Into<String>) -> Self {
        Self {
            image_path: image_path.into(),
            kernel_path: None,
            initrd_path: None,
            id: id.into(),
        }
    }

    /// Every present file path, image first.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.image_path.as_path())
            .chain(self.kernel_path.as_deref())
            .chain(self.initrd_path.as_deref())
    }
}

/// Serialize `Option<PathBuf>` as the path string, `None` as `""`.
pub(crate) mod opt_path {
    use std::path::PathBuf;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<PathBuf>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(path) => serializer.serialize_str(&path.to_string_lossy()),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<PathBuf>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(if raw.is_empty() {
            None
        } else {
            Some(PathBuf::from(raw))
        })
    }
}
