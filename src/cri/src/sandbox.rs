//! Pod sandbox bookkeeping.
//!
//! LXD has no pod concept, so a sandbox exists only as a record on disk:
//! one file per pod UID under the sandbox root, holding the protobuf
//! encoded `PodSandboxConfig` the sandbox was created from. A sandbox is
//! ready exactly while its record exists; the record's change time is the
//! sandbox creation time.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use prost::Message;

use lxdlet_core::{LxdletError, Result};

use crate::cri_api::{PodSandboxConfig, PodSandboxState};

/// Permissions of record files.
const RECORD_MODE: u32 = 0o644;

/// A persisted sandbox.
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxRecord {
    /// Pod UID, also the sandbox identifier.
    pub pod_uid: String,
    /// Record bytes as stored.
    pub data: Vec<u8>,
    /// Decoded sandbox configuration.
    pub config: PodSandboxConfig,
    /// Creation timestamp in nanoseconds.
    pub created_at: i64,
}

impl SandboxRecord {
    /// Readiness of the sandbox. A record only exists for ready sandboxes.
    pub fn state(&self) -> PodSandboxState {
        PodSandboxState::SandboxReady
    }
}

/// File-backed store of sandbox records, keyed by pod UID.
///
/// No locking: operations on different pods touch different files, and
/// concurrent operations on the same pod are not coordinated.
#[derive(Debug, Clone)]
pub struct SandboxStore {
    root: PathBuf,
}

impl SandboxStore {
    /// Create a store rooted at `root`. The directory is not touched.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(root);
        std::fs::create_dir_all(&store.root).map_err(|e| {
            LxdletError::IoError(std::io::Error::new(
                e.kind(),
                format!(
                    "failed to create sandbox root {}: {}",
                    store.root.display(),
                    e
                ),
            ))
        })?;
        Ok(store)
    }

    /// Directory holding the records.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist the configuration of a sandbox, replacing any existing record.
    pub fn put(&self, pod_uid: &str, config: &PodSandboxConfig) -> Result<()> {
        self.put_raw(pod_uid, &config.encode_to_vec())
    }

    /// Persist raw record bytes, replacing any existing record.
    pub fn put_raw(&self, pod_uid: &str, data: &[u8]) -> Result<()> {
        let path = self.record_path(pod_uid)?;
        // Write beside the record and rename, so readers never see a partial file.
        let tmp_path = self.root.join(format!(".{}.tmp", pod_uid));

        if let Err(e) = write_and_rename(&tmp_path, &path, data) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        tracing::debug!(pod_uid = %pod_uid, path = %path.display(), "Stored sandbox record");
        Ok(())
    }

    /// Load the record of a sandbox. `Ok(None)` when no record exists.
    ///
    /// Fails with `CorruptRecord` when the record cannot be decoded.
    pub fn get(&self, pod_uid: &str) -> Result<Option<SandboxRecord>> {
        let path = self.record_path(pod_uid)?;

        let metadata = match std::fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let created_at = metadata
            .ctime()
            .saturating_mul(1_000_000_000)
            .saturating_add(metadata.ctime_nsec());

        let data = match std::fs::read(&path) {
            Ok(data) => data,
            // Removed between stat and read.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let config =
            PodSandboxConfig::decode(data.as_slice()).map_err(|e| LxdletError::CorruptRecord {
                pod_uid: pod_uid.to_string(),
                message: e.to_string(),
            })?;

        Ok(Some(SandboxRecord {
            pod_uid: pod_uid.to_string(),
            data,
            config,
            created_at,
        }))
    }

    /// Whether a record exists for the pod.
    pub fn exists(&self, pod_uid: &str) -> Result<bool> {
        Ok(self.record_path(pod_uid)?.is_file())
    }

    /// Delete the record of a sandbox. Removing a missing record is not an error.
    pub fn remove(&self, pod_uid: &str) -> Result<()> {
        let path = self.record_path(pod_uid)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(pod_uid = %pod_uid, "Removed sandbox record");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Pod UIDs of all stored sandboxes, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut uids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            uids.push(name);
        }
        uids.sort();
        Ok(uids)
    }

    fn record_path(&self, pod_uid: &str) -> Result<PathBuf> {
        if pod_uid.is_empty() || pod_uid.starts_with('.') || pod_uid.contains('/') {
            return Err(LxdletError::InvalidArgument(format!(
                "invalid pod uid '{}'",
                pod_uid
            )));
        }
        Ok(self.root.join(pod_uid))
    }
}

fn write_and_rename(tmp_path: &Path, path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(RECORD_MODE)
        .open(tmp_path)?;
    file.set_permissions(std::fs::Permissions::from_mode(RECORD_MODE))?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(tmp_path, path)
}
