//! Persistence of fetch metadata and the active snapshot.
//!
//! The controller keeps its working state in memory and writes through to a
//! [`RemoteConfigStorage`] backend, so an instance re-created over the same storage resumes from
//! the last activated configuration when it is initialized.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::remote_config::error::{internal_error, RemoteConfigResult};
use crate::remote_config::snapshot::Snapshot;
use crate::remote_config::value::RemoteConfigValueSource;

/// Outcome of the last fetch attempt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FetchStatus {
    #[default]
    NoFetchYet,
    Success,
    Failure,
    Throttled,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::NoFetchYet => "noFetchYet",
            FetchStatus::Success => "success",
            FetchStatus::Failure => "failure",
            FetchStatus::Throttled => "throttled",
        }
    }
}

/// Bookkeeping consulted by the throttler.
///
/// `last_fetch_time_millis` is the completion time of the last successful fetch, or `0` when
/// there has been none.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchState {
    pub last_fetch_time_millis: u64,
    pub last_fetch_status: FetchStatus,
}

/// Serialized form of an activated snapshot. Raw values are base64 encoded.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSnapshot {
    entries: HashMap<String, String>,
    #[serde(default)]
    etag: Option<String>,
    #[serde(default)]
    template_version: Option<u64>,
}

impl StoredSnapshot {
    /// Decodes the stored entries back into a remote-tagged snapshot.
    pub fn into_snapshot(self) -> RemoteConfigResult<Snapshot> {
        let mut entries = Vec::with_capacity(self.entries.len());
        for (key, encoded) in self.entries {
            let raw = STANDARD.decode(encoded.as_bytes()).map_err(|err| {
                internal_error(format!("failed to decode stored value for '{key}': {err}"))
            })?;
            entries.push((key, raw));
        }
        Ok(
            Snapshot::from_entries(RemoteConfigValueSource::Remote, entries)
                .with_etag(self.etag)
                .with_template_version(self.template_version),
        )
    }
}

impl From<&Snapshot> for StoredSnapshot {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            entries: snapshot
                .parameters()
                .map(|parameter| {
                    (
                        parameter.name().to_owned(),
                        STANDARD.encode(parameter.raw_value()),
                    )
                })
                .collect(),
            etag: snapshot.etag().map(str::to_owned),
            template_version: snapshot.template_version(),
        }
    }
}

#[async_trait::async_trait]
pub trait RemoteConfigStorage: Send + Sync {
    async fn get_last_fetch_status(&self) -> RemoteConfigResult<Option<FetchStatus>>;
    async fn set_last_fetch_status(&self, status: FetchStatus) -> RemoteConfigResult<()>;

    async fn get_last_successful_fetch_timestamp_millis(&self) -> RemoteConfigResult<Option<u64>>;
    async fn set_last_successful_fetch_timestamp_millis(
        &self,
        timestamp: u64,
    ) -> RemoteConfigResult<()>;

    async fn get_active_config(&self) -> RemoteConfigResult<Option<StoredSnapshot>>;
    async fn set_active_config(&self, config: StoredSnapshot) -> RemoteConfigResult<()>;
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct StorageRecord {
    last_fetch_status: Option<FetchStatus>,
    last_successful_fetch_timestamp_millis: Option<u64>,
    active_config: Option<StoredSnapshot>,
}

/// Process-local storage; state lives as long as the value.
#[derive(Default)]
pub struct InMemoryRemoteConfigStorage {
    inner: Mutex<StorageRecord>,
}

impl InMemoryRemoteConfigStorage {
    fn record(&self) -> std::sync::MutexGuard<'_, StorageRecord> {
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

#[async_trait::async_trait]
impl RemoteConfigStorage for InMemoryRemoteConfigStorage {
    async fn get_last_fetch_status(&self) -> RemoteConfigResult<Option<FetchStatus>> {
        Ok(self.record().last_fetch_status)
    }

    async fn set_last_fetch_status(&self, status: FetchStatus) -> RemoteConfigResult<()> {
        self.record().last_fetch_status = Some(status);
        Ok(())
    }

    async fn get_last_successful_fetch_timestamp_millis(&self) -> RemoteConfigResult<Option<u64>> {
        Ok(self.record().last_successful_fetch_timestamp_millis)
    }

    async fn set_last_successful_fetch_timestamp_millis(
        &self,
        timestamp: u64,
    ) -> RemoteConfigResult<()> {
        self.record().last_successful_fetch_timestamp_millis = Some(timestamp);
        Ok(())
    }

    async fn get_active_config(&self) -> RemoteConfigResult<Option<StoredSnapshot>> {
        Ok(self.record().active_config.clone())
    }

    async fn set_active_config(&self, config: StoredSnapshot) -> RemoteConfigResult<()> {
        self.record().active_config = Some(config);
        Ok(())
    }
}

/// JSON file storage suitable for desktop and server processes.
///
/// Every write rewrites the whole file.
pub struct FileRemoteConfigStorage {
    path: PathBuf,
    inner: Mutex<StorageRecord>,
}

impl FileRemoteConfigStorage {
    pub fn new(path: PathBuf) -> RemoteConfigResult<Self> {
        let record = if path.exists() {
            Self::load_record(&path)?
        } else {
            StorageRecord::default()
        };
        Ok(Self {
            path,
            inner: Mutex::new(record),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_record(path: &Path) -> RemoteConfigResult<StorageRecord> {
        let data = fs::read(path)
            .map_err(|err| internal_error(format!("failed to read storage file: {err}")))?;
        serde_json::from_slice(&data)
            .map_err(|err| internal_error(format!("failed to parse storage file as JSON: {err}")))
    }

    fn update<F>(&self, apply: F) -> RemoteConfigResult<()>
    where
        F: FnOnce(&mut StorageRecord),
    {
        let mut record = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
        let mut updated = record.clone();
        apply(&mut updated);
        self.persist(&updated)?;
        *record = updated;
        Ok(())
    }

    fn persist(&self, record: &StorageRecord) -> RemoteConfigResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                internal_error(format!("failed to create storage directory: {err}"))
            })?;
        }
        let serialized = serde_json::to_vec_pretty(record)
            .map_err(|err| internal_error(format!("failed to serialize storage record: {err}")))?;
        fs::write(&self.path, serialized)
            .map_err(|err| internal_error(format!("failed to write storage file: {err}")))
    }

    fn read<T>(&self, select: impl FnOnce(&StorageRecord) -> T) -> T {
        select(&self.inner.lock().unwrap_or_else(|poison| poison.into_inner()))
    }
}

#[async_trait::async_trait]
impl RemoteConfigStorage for FileRemoteConfigStorage {
    async fn get_last_fetch_status(&self) -> RemoteConfigResult<Option<FetchStatus>> {
        Ok(self.read(|record| record.last_fetch_status))
    }

    async fn set_last_fetch_status(&self, status: FetchStatus) -> RemoteConfigResult<()> {
        self.update(|record| record.last_fetch_status = Some(status))
    }

    async fn get_last_successful_fetch_timestamp_millis(&self) -> RemoteConfigResult<Option<u64>> {
        Ok(self.read(|record| record.last_successful_fetch_timestamp_millis))
    }

    async fn set_last_successful_fetch_timestamp_millis(
        &self,
        timestamp: u64,
    ) -> RemoteConfigResult<()> {
        self.update(|record| record.last_successful_fetch_timestamp_millis = Some(timestamp))
    }

    async fn get_active_config(&self) -> RemoteConfigResult<Option<StoredSnapshot>> {
        Ok(self.read(|record| record.active_config.clone()))
    }

    async fn set_active_config(&self, config: StoredSnapshot) -> RemoteConfigResult<()> {
        self.update(|record| record.active_config = Some(config))
    }
}
