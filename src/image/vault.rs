//! The image vault: a two-tier, content-addressed cache of prepared images
//! and per-instance copies.
//!
//! Tier one is keyed by instance name, the strongest identity; once an
//! instance has an image, it keeps that view even if the catalog moves.
//! Tier two is keyed by catalog id and shared across instances, so each
//! image version is downloaded and prepared once. Both tiers are journaled
//! to disk after every mutation.
//!
//! The vault is single-writer and non-reentrant: all mutating operations
//! take `&mut self` and must not be invoked concurrently. `fetch_image` can
//! block for as long as a download or prepare takes; callers dispatch it
//! off their I/O thread.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::artifact::{Artifact, FetchType};
use super::catalog::{CatalogClient, CatalogError, Query};
use super::download::{DownloadError, Downloader, ProgressMonitor};
use super::guard::{TentativeDir, TentativeFile};
use super::journal::{
    JournalError, RecordJournal, VaultRecord, INSTANCE_RECORDS_FILE, PREPARED_RECORDS_FILE,
};
use super::layout::{filename_for, CacheLayout, LayoutError};

/// Caller-supplied transform from downloaded source artifacts to the form
/// the hypervisor consumes. Runs once per catalog id; may be a no-op
/// returning the paths unchanged, or may write replacement files alongside
/// the sources and return those.
pub trait Prepare: Send {
    fn prepare(&mut self, source: &Artifact) -> anyhow::Result<Artifact>;
}

impl<F> Prepare for F
where
    F: FnMut(&Artifact) -> anyhow::Result<Artifact> + Send,
{
    fn prepare(&mut self, source: &Artifact) -> anyhow::Result<Artifact> {
        self(source)
    }
}

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    #[error("prepare failed for image {id}: {source}")]
    Prepare {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("layout error: {0}")]
    Layout(#[from] LayoutError),

    #[error("journal error: {0}")]
    Journal(#[from] JournalError),
}

/// Instance files copied to disk but not yet owned by a published record.
/// Dropping it reclaims the copies and their directory.
struct StagedInstance {
    image: Artifact,
    file_guards: Vec<TentativeFile>,
    dir_guard: TentativeDir,
}

impl StagedInstance {
    fn publish(self) -> Artifact {
        for guard in self.file_guards {
            guard.release();
        }
        self.dir_guard.release();
        self.image
    }
}

/// The cache and its on-disk journals. Collaborators are borrowed; the
/// vault owns neither the catalog nor the downloader.
pub struct ImageVault<'a> {
    catalog: &'a dyn CatalogClient,
    downloader: &'a dyn Downloader,
    layout: CacheLayout,
    prepared_journal: RecordJournal,
    instance_journal: RecordJournal,
    prepared_records: HashMap<String, VaultRecord>,
    instance_records: HashMap<String, VaultRecord>,
}

impl<'a> ImageVault<'a> {
    /// Open a vault over `cache_dir`, loading both journals. Missing or
    /// corrupt journals start empty; the vault rebuilds over time.
    pub fn new(
        catalog: &'a dyn CatalogClient,
        downloader: &'a dyn Downloader,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        let root: PathBuf = cache_dir.into();
        let prepared_journal = RecordJournal::new(root.join(PREPARED_RECORDS_FILE));
        let instance_journal = RecordJournal::new(root.join(INSTANCE_RECORDS_FILE));
        let prepared_records = prepared_journal.load();
        let instance_records = instance_journal.load();
        info!(
            cache_dir = %root.display(),
            prepared = prepared_records.len(),
            instances = instance_records.len(),
            "image vault loaded"
        );
        Self {
            catalog,
            downloader,
            layout: CacheLayout::new(root),
            prepared_journal,
            instance_journal,
            prepared_records,
            instance_records,
        }
    }

    pub fn has_instance(&self, name: &str) -> bool {
        self.instance_records.contains_key(name)
    }

    pub fn has_prepared(&self, id: &str) -> bool {
        self.prepared_records.contains_key(id)
    }

    /// Fetch the image for `query`, reusing records at both tiers.
    ///
    /// An existing instance record wins outright; the catalog is not even
    /// consulted. A prepared record for the resolved catalog id saves the
    /// download and prepare; only the instance copy is made. A full miss
    /// downloads, prepares, publishes both records, and sweeps prepared
    /// entries the catalog no longer stands behind.
    ///
    /// A record is committed to the in-memory table only after its journal
    /// write has landed, and files stay guarded until the record that owns
    /// them is committed. Failure at any step, journal writes included,
    /// reclaims the unpublished files and leaves each table consistent with
    /// its journal on disk.
    pub async fn fetch_image(
        &mut self,
        fetch_type: FetchType,
        query: &Query,
        prepare: &mut dyn Prepare,
        monitor: &mut dyn ProgressMonitor,
    ) -> Result<Artifact, VaultError> {
        if let Some(record) = self.instance_records.get(&query.name) {
            debug!(instance = %query.name, id = %record.image.id, "instance record hit");
            return Ok(record.image.clone());
        }

        let info = self.catalog.info_for(query).await?;
        let id = info.id.clone();

        if let Some(record) = self.prepared_records.get(&id) {
            let prepared_image = record.image.clone();
            info!(instance = %query.name, id = %id, "prepared image hit, instantiating copy");
            let staged = self.instantiate(&query.name, &prepared_image)?;

            let mut instances_next = self.instance_records.clone();
            instances_next.insert(
                query.name.clone(),
                VaultRecord {
                    image: staged.image.clone(),
                    query: query.clone(),
                },
            );
            self.instance_journal.store(&instances_next)?;
            self.instance_records = instances_next;
            return Ok(staged.publish());
        }

        let image_dir = self.layout.image_dir(&info.release, &info.version)?;
        let dir_guard = TentativeDir::new(&image_dir);

        let mut source_image = Artifact::image_only(
            image_dir.join(filename_for(&info.image_location)),
            id.clone(),
        );
        let mut file_guards = vec![TentativeFile::new(&source_image.image_path)];
        info!(instance = %query.name, id = %id, url = %info.image_location, "downloading image");
        self.downloader
            .download_to(&info.image_location, &source_image.image_path, monitor)
            .await?;

        if fetch_type == FetchType::ImageKernelAndInitrd {
            if !info.kernel_location.is_empty() {
                let path = image_dir.join(filename_for(&info.kernel_location));
                file_guards.push(TentativeFile::new(&path));
                self.downloader
                    .download_to(&info.kernel_location, &path, monitor)
                    .await?;
                source_image.kernel_path = Some(path);
            }
            if !info.initrd_location.is_empty() {
                let path = image_dir.join(filename_for(&info.initrd_location));
                file_guards.push(TentativeFile::new(&path));
                self.downloader
                    .download_to(&info.initrd_location, &path, monitor)
                    .await?;
                source_image.initrd_path = Some(path);
            }
        }

        debug!(id = %id, "preparing image");
        let mut prepared_image =
            prepare
                .prepare(&source_image)
                .map_err(|source| VaultError::Prepare {
                    id: id.clone(),
                    source,
                })?;
        prepared_image.id = id.clone();

        // Files the prepare step introduced are tentative too, until the
        // record that owns them is published.
        let source_paths: Vec<&Path> = source_image.paths().collect();
        for path in prepared_image.paths() {
            if !source_paths.contains(&path) {
                file_guards.push(TentativeFile::new(path));
            }
        }

        let staged = self.instantiate(&query.name, &prepared_image)?;

        let mut prepared_next = self.prepared_records.clone();
        prepared_next.insert(
            id.clone(),
            VaultRecord {
                image: prepared_image.clone(),
                query: query.clone(),
            },
        );
        self.expunge_stale_prepared(&mut prepared_next).await;
        self.prepared_journal.store(&prepared_next)?;
        self.prepared_records = prepared_next;

        for guard in file_guards {
            guard.release();
        }
        dir_guard.release();
        self.remove_superseded_sources(&source_image, &prepared_image);

        let mut instances_next = self.instance_records.clone();
        instances_next.insert(
            query.name.clone(),
            VaultRecord {
                image: staged.image.clone(),
                query: query.clone(),
            },
        );
        self.instance_journal.store(&instances_next)?;
        self.instance_records = instances_next;
        let instance_image = staged.publish();

        info!(instance = %query.name, id = %id, "image fetched");
        Ok(instance_image)
    }

    /// Remove an instance and its files. Unknown names are a no-op.
    pub fn remove(&mut self, name: &str) -> Result<(), VaultError> {
        let Some(record) = self.instance_records.get(name) else {
            debug!(instance = name, "remove: no such instance");
            return Ok(());
        };
        for path in record.image.paths() {
            self.layout.remove_file(path)?;
        }
        self.layout.remove_instance_dir(name);

        let mut instances_next = self.instance_records.clone();
        instances_next.remove(name);
        self.instance_journal.store(&instances_next)?;
        self.instance_records = instances_next;
        info!(instance = name, "instance image removed");
        Ok(())
    }

    /// Copy a prepared artifact into a fresh per-instance directory. The
    /// copies are plain files; downstream components may mutate them
    /// without touching the shared prepared artifact. They stay guarded
    /// until the caller publishes the staged instance.
    fn instantiate(&self, name: &str, prepared: &Artifact) -> Result<StagedInstance, LayoutError> {
        let dir = self.layout.instance_dir(name)?;
        let dir_guard = TentativeDir::new(&dir);
        let mut file_guards = Vec::new();

        let image_path = self.layout.copy_into(&prepared.image_path, &dir)?;
        file_guards.push(TentativeFile::new(&image_path));

        let mut kernel_path = None;
        if let Some(path) = &prepared.kernel_path {
            let copied = self.layout.copy_into(path, &dir)?;
            file_guards.push(TentativeFile::new(&copied));
            kernel_path = Some(copied);
        }

        let mut initrd_path = None;
        if let Some(path) = &prepared.initrd_path {
            let copied = self.layout.copy_into(path, &dir)?;
            file_guards.push(TentativeFile::new(&copied));
            initrd_path = Some(copied);
        }

        debug!(instance = name, dir = %dir.display(), "instantiated image copy");
        Ok(StagedInstance {
            image: Artifact {
                image_path,
                kernel_path,
                initrd_path,
                id: prepared.id.clone(),
            },
            file_guards,
            dir_guard,
        })
    }

    /// Delete source files the prepare step replaced. A no-op prepare
    /// adopts every source file in place, so nothing is deleted.
    fn remove_superseded_sources(&self, source: &Artifact, prepared: &Artifact) {
        if source.image_path != prepared.image_path {
            self.discard(&source.image_path);
        }
        if let Some(path) = &source.kernel_path {
            if prepared.kernel_path.as_ref() != Some(path) {
                self.discard(path);
            }
        }
        if let Some(path) = &source.initrd_path {
            if prepared.initrd_path.as_ref() != Some(path) {
                self.discard(path);
            }
        }
    }

    fn discard(&self, path: &Path) {
        match self.layout.remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed superseded source file"),
            Err(error) => warn!(%error, "could not remove superseded source file"),
        }
    }

    /// Drop prepared records whose catalog id no longer matches what the
    /// catalog reports for their query. An unreachable catalog keeps the
    /// record for the next pass rather than failing the fetch that just
    /// succeeded. Stale entries lose their table row and journal entry;
    /// their files on disk are left in place.
    async fn expunge_stale_prepared(&self, records: &mut HashMap<String, VaultRecord>) {
        let mut stale = Vec::new();
        for (key, record) in records.iter() {
            match self.catalog.info_for(&record.query).await {
                Ok(info) if info.id != *key => {
                    info!(
                        id = %key,
                        new_id = %info.id,
                        release = %record.query.release,
                        "prepared image superseded by catalog"
                    );
                    stale.push(key.clone());
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(id = %key, %error, "catalog lookup failed during invalidation, keeping record");
                }
            }
        }
        for key in stale {
            records.remove(&key);
        }
    }
}
