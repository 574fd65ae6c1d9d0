//! Layered parameter storage: defaults, pending (last fetched) and active.
//!
//! Readers load the published `defaults`/`active` snapshots without taking locks. The pending
//! slot sits behind an async mutex that is held for the whole promotion so a staged snapshot is
//! consumed at most once.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use async_lock::Mutex as AsyncMutex;

use crate::remote_config::error::RemoteConfigResult;
use crate::remote_config::snapshot::Snapshot;
use crate::remote_config::value::RemoteConfigValue;

pub struct ValueStore {
    defaults: ArcSwap<Snapshot>,
    active: ArcSwapOption<Snapshot>,
    pending: AsyncMutex<Option<Arc<Snapshot>>>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self {
            defaults: ArcSwap::from_pointee(Snapshot::empty()),
            active: ArcSwapOption::empty(),
            pending: AsyncMutex::new(None),
        }
    }

    pub fn defaults(&self) -> Arc<Snapshot> {
        self.defaults.load_full()
    }

    pub fn set_defaults(&self, defaults: Snapshot) {
        self.defaults.store(Arc::new(defaults));
    }

    /// Returns the snapshot served to readers: the activated one, or the defaults before any
    /// activation.
    pub fn active(&self) -> Arc<Snapshot> {
        self.active.load_full().unwrap_or_else(|| self.defaults())
    }

    /// Returns the last activated fetch result, if any.
    pub fn activated(&self) -> Option<Arc<Snapshot>> {
        self.active.load_full()
    }

    pub(crate) fn restore_active(&self, snapshot: Snapshot) {
        self.active.store(Some(Arc::new(snapshot)));
    }

    /// Stages `snapshot` as pending, replacing whatever was staged before.
    pub async fn stage(&self, snapshot: Arc<Snapshot>) {
        *self.pending.lock().await = Some(snapshot);
    }

    #[cfg(test)]
    pub(crate) async fn has_pending(&self) -> bool {
        self.pending.lock().await.is_some()
    }

    /// Promotes the pending snapshot to active.
    ///
    /// `persist` runs while the pending slot is locked; if it fails the snapshot stays staged and
    /// the active layer is untouched. Returns `false` when nothing was staged.
    pub async fn promote_with<F, Fut>(&self, persist: F) -> RemoteConfigResult<bool>
    where
        F: FnOnce(Arc<Snapshot>) -> Fut,
        Fut: Future<Output = RemoteConfigResult<()>>,
    {
        let mut pending = self.pending.lock().await;
        let Some(snapshot) = (*pending).clone() else {
            return Ok(false);
        };
        persist(Arc::clone(&snapshot)).await?;
        self.active.store(Some(snapshot));
        *pending = None;
        Ok(true)
    }

    /// Looks a key up with precedence active, then defaults, then the static fallback.
    pub fn get(&self, key: &str) -> RemoteConfigValue {
        if let Some(active) = self.active.load().as_ref() {
            if let Some(parameter) = active.get(key) {
                return parameter.to_value();
            }
        }
        self.defaults
            .load()
            .get(key)
            .map(|parameter| parameter.to_value())
            .unwrap_or_default()
    }

    pub fn keys_by_prefix(&self, prefix: &str) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        if let Some(active) = self.active.load().as_ref() {
            keys.extend(
                active
                    .keys()
                    .filter(|key| key.starts_with(prefix))
                    .map(str::to_owned),
            );
        }
        keys.extend(
            self.defaults
                .load()
                .keys()
                .filter(|key| key.starts_with(prefix))
                .map(str::to_owned),
        );
        keys
    }

    /// Union of defaults and active values, with active entries taking precedence.
    pub fn all(&self) -> HashMap<String, RemoteConfigValue> {
        let mut all: HashMap<String, RemoteConfigValue> = self
            .defaults
            .load()
            .parameters()
            .map(|parameter| (parameter.name().to_owned(), parameter.to_value()))
            .collect();
        if let Some(active) = self.active.load().as_ref() {
            for parameter in active.parameters() {
                all.insert(parameter.name().to_owned(), parameter.to_value());
            }
        }
        all
    }
}

impl Default for ValueStore {
    fn default() -> Self {
        Self::new()
    }
}
