//! Destination backed by a (possibly network-mounted) directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;

use super::{DeleteOutcome, DestinationStore, StoreError, StoreProvider};

/// Suffix of in-progress writes; never visible under the final name.
const PARTIAL_SUFFIX: &str = ".partial";

/// Reject names that would escape the destination folder.
fn validate_name(name: &str) -> Result<(), StoreError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
        || name.ends_with(PARTIAL_SUFFIX);
    if invalid {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Remove a file, treating an already-missing file as success.
pub async fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Available bytes on the disk holding `path`, from the longest matching mount point.
pub fn available_space(path: &Path) -> Option<u64> {
    let path = std::fs::canonicalize(path).ok()?;
    let disks = sysinfo::Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| d.available_space())
}

#[derive(Debug, Clone)]
pub struct LocalFsStore {
    root: PathBuf,
}

impl LocalFsStore {
    /// Open (creating if needed) the destination folder.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, StoreError> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }
}

#[async_trait::async_trait]
impl DestinationStore for LocalFsStore {
    async fn exists(&self, name: &str) -> Result<bool, StoreError> {
        let path = self.path_for(name)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn write(&self, name: &str, staged: &Path) -> Result<u64, StoreError> {
        let target = self.path_for(name)?;
        let partial = self.root.join(format!("{}{}", name, PARTIAL_SUFFIX));

        // Copy rather than move so a retried write still has its source.
        let result: Result<u64, StoreError> = async {
            fs::copy(staged, &partial).await?;
            fs::rename(&partial, &target).await?;
            Ok(fs::metadata(&target).await?.len())
        }
        .await;

        if result.is_err() {
            if let Err(e) = remove_if_present(&partial).await {
                tracing::warn!("Could not remove partial write {}: {}", partial.display(), e);
            }
        }
        result
    }

    async fn delete(&self, name: &str) -> Result<DeleteOutcome, StoreError> {
        let path = self.path_for(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(DeleteOutcome::Deleted),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DeleteOutcome::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_names(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.ends_with(PARTIAL_SUFFIX) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn free_space(&self) -> Result<Option<u64>, StoreError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || available_space(&root))
            .await
            .map_err(|e| StoreError::Unavailable(format!("free space check failed: {}", e)))
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

/// Opens `<base>/<target folder>` as a [`LocalFsStore`].
#[derive(Debug, Clone)]
pub struct LocalFsProvider {
    base: PathBuf,
}

impl LocalFsProvider {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

impl StoreProvider for LocalFsProvider {
    fn open(&self, target_folder: &str) -> Result<Arc<dyn DestinationStore>, StoreError> {
        if !self.base.is_dir() {
            return Err(StoreError::Unavailable(format!(
                "destination base path does not exist: {}",
                self.base.display()
            )));
        }
        let store = LocalFsStore::open(self.base.join(target_folder))?;
        Ok(Arc::new(store))
    }
}
