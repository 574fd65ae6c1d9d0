use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use async_lock::OnceCell;
use serde_json::Value as JsonValue;

use crate::platform::runtime;
use crate::remote_config::error::{
    client_timeout, not_initialized, throttled, RemoteConfigError, RemoteConfigResult,
};
use crate::remote_config::fetch::{
    FetchRequest, FetchResponse, NoopFetchClient, RemoteConfigFetchClient,
};
use crate::remote_config::logger::LOGGER;
use crate::remote_config::settings::{RemoteConfigSettings, RemoteConfigSettingsUpdate};
use crate::remote_config::snapshot::Snapshot;
use crate::remote_config::storage::{
    FetchState, FetchStatus, InMemoryRemoteConfigStorage, RemoteConfigStorage, StoredSnapshot,
};
use crate::remote_config::store::ValueStore;
use crate::remote_config::throttle::{can_fetch, ThrottleDecision};
use crate::remote_config::value::RemoteConfigValue;

/// A named remote config instance.
///
/// Cloning is cheap; clones share the same value store, fetch state and settings.
#[derive(Clone)]
pub struct RemoteConfig {
    inner: Arc<RemoteConfigInner>,
}

struct RemoteConfigInner {
    name: String,
    store: ValueStore,
    fetch_state: Mutex<FetchState>,
    settings: Mutex<RemoteConfigSettings>,
    fetch_client: Mutex<Arc<dyn RemoteConfigFetchClient>>,
    storage: Arc<dyn RemoteConfigStorage>,
    initialized: OnceCell<()>,
}

/// Snapshot of the settings and fetch bookkeeping of an instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RemoteConfigInfo {
    pub settings: RemoteConfigSettings,
    pub fetch_state: FetchState,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}

impl RemoteConfig {
    /// Creates an instance backed by in-memory storage and the [`NoopFetchClient`].
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_storage(name, Arc::new(InMemoryRemoteConfigStorage::default()))
    }

    /// Creates an instance that hydrates from and writes through to `storage`.
    pub fn with_storage(name: impl Into<String>, storage: Arc<dyn RemoteConfigStorage>) -> Self {
        let fetch_client: Arc<dyn RemoteConfigFetchClient> = Arc::new(NoopFetchClient);
        Self {
            inner: Arc::new(RemoteConfigInner {
                name: name.into(),
                store: ValueStore::new(),
                fetch_state: Mutex::new(FetchState::default()),
                settings: Mutex::new(RemoteConfigSettings::default()),
                fetch_client: Mutex::new(fetch_client),
                storage,
                initialized: OnceCell::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Replaces the underlying fetch client.
    ///
    /// Useful for tests or environments that need to supply a custom transport implementation,
    /// such as [`HttpRemoteConfigFetchClient`](crate::remote_config::fetch::HttpRemoteConfigFetchClient).
    pub fn set_fetch_client(&self, fetch_client: Arc<dyn RemoteConfigFetchClient>) {
        *lock(&self.inner.fetch_client) = fetch_client;
    }

    fn fetch_client(&self) -> Arc<dyn RemoteConfigFetchClient> {
        Arc::clone(&lock(&self.inner.fetch_client))
    }

    /// Returns a copy of the current settings.
    pub fn settings(&self) -> RemoteConfigSettings {
        *lock(&self.inner.settings)
    }

    /// Replaces the settings wholesale. Use [`RemoteConfigSettings::new`] to validate raw values.
    pub fn set_config_settings(&self, settings: RemoteConfigSettings) {
        *lock(&self.inner.settings) = settings;
    }

    /// Applies a partial update, leaving the settings untouched when validation fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use remote_config_rs::remote_config::constants::DEFAULT_INSTANCE_NAME;
    /// use remote_config_rs::remote_config::RemoteConfig;
    /// use remote_config_rs::remote_config::settings::RemoteConfigSettingsUpdate;
    ///
    /// let rc = RemoteConfig::new(DEFAULT_INSTANCE_NAME);
    /// rc.update_config_settings(RemoteConfigSettingsUpdate {
    ///     minimum_fetch_interval_seconds: Some(3_600),
    ///     ..Default::default()
    /// })
    /// .unwrap();
    /// assert_eq!(rc.settings().minimum_fetch_interval_seconds(), 3_600);
    /// assert!(rc
    ///     .update_config_settings(RemoteConfigSettingsUpdate {
    ///         fetch_timeout_seconds: Some(0),
    ///         ..Default::default()
    ///     })
    ///     .is_err());
    /// ```
    pub fn update_config_settings(&self, update: RemoteConfigSettingsUpdate) -> RemoteConfigResult<()> {
        if update.is_empty() {
            return Ok(());
        }
        let mut settings = lock(&self.inner.settings);
        *settings = update.apply_to(*settings)?;
        Ok(())
    }

    /// Loads persisted fetch metadata and the last activated snapshot.
    ///
    /// Idempotent: concurrent callers wait for the same hydration and later calls return
    /// immediately. A failed hydration leaves the instance uninitialized so it can be retried.
    pub async fn ensure_initialized(&self) -> RemoteConfigResult<()> {
        self.inner
            .initialized
            .get_or_try_init(|| async {
                let storage = &self.inner.storage;
                let status = storage.get_last_fetch_status().await?;
                let timestamp = storage.get_last_successful_fetch_timestamp_millis().await?;
                if let Some(stored) = storage.get_active_config().await? {
                    self.inner.store.restore_active(stored.into_snapshot()?);
                }
                *lock(&self.inner.fetch_state) = FetchState {
                    last_fetch_time_millis: timestamp.unwrap_or(0),
                    last_fetch_status: status.unwrap_or_default(),
                };
                LOGGER.debug(format!(
                    "remote config '{}' initialized (last fetch status: {})",
                    self.inner.name,
                    status.unwrap_or_default().as_str()
                ));
                Ok::<(), RemoteConfigError>(())
            })
            .await?;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.is_initialized()
    }

    fn require_initialized(&self) -> RemoteConfigResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(not_initialized(format!(
                "remote config '{}' must be initialized before fetching or activating",
                self.inner.name
            )))
        }
    }

    /// Replaces the default layer. Active and pending snapshots are not touched.
    pub fn set_defaults(&self, defaults: HashMap<String, JsonValue>) -> RemoteConfigResult<()> {
        let snapshot = Snapshot::from_json_defaults(defaults)?;
        self.inner.store.set_defaults(snapshot);
        Ok(())
    }

    /// Fetches a fresh snapshot and stages it as pending.
    ///
    /// Fails with a throttle error when the last successful fetch is younger than the minimum
    /// fetch interval, and with a client error when the fetch client fails or exceeds the fetch
    /// timeout. Only a successful fetch updates the fetch timestamp.
    pub async fn fetch(&self) -> RemoteConfigResult<()> {
        self.require_initialized()?;
        let settings = self.settings();
        let state = self.fetch_state();

        let decision = can_fetch(
            current_timestamp_millis(),
            state.last_fetch_time_millis,
            state.last_fetch_status,
            settings.minimum_fetch_interval_seconds(),
        );
        if let ThrottleDecision::Throttled { retry_after_millis } = decision {
            self.record_unsuccessful(FetchStatus::Throttled).await;
            LOGGER.debug(format!(
                "fetch for '{}' throttled, retry in {retry_after_millis} ms",
                self.inner.name
            ));
            return Err(throttled(format!(
                "fetch throttled; the minimum fetch interval ends in {retry_after_millis} ms"
            )));
        }

        let request = FetchRequest {
            timeout: settings.fetch_timeout(),
            e_tag: self
                .inner
                .store
                .activated()
                .and_then(|active| active.etag().map(str::to_owned)),
        };
        let client = self.fetch_client();
        let budget = request.timeout;
        let attempt = async move { client.fetch(request).await };
        let outcome = match runtime::with_timeout(budget, attempt).await {
            Ok(outcome) => outcome,
            Err(elapsed) => Err(client_timeout(format!(
                "fetch did not complete within {} s",
                elapsed.budget.as_secs()
            ))),
        };

        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                self.record_unsuccessful(FetchStatus::Failure).await;
                LOGGER.warn(format!("fetch for '{}' failed: {err}", self.inner.name));
                return Err(err);
            }
        };

        let staged = match response {
            FetchResponse::Template(snapshot) => Arc::new(snapshot),
            FetchResponse::NotModified => self
                .inner
                .store
                .activated()
                .unwrap_or_else(|| Arc::new(Snapshot::empty())),
        };

        // Nothing becomes visible until the bookkeeping is persisted.
        let now = current_timestamp_millis();
        if let Err(err) = self.persist_success(now).await {
            self.record_unsuccessful(FetchStatus::Failure).await;
            LOGGER.warn(format!(
                "fetch for '{}' could not be recorded: {err}",
                self.inner.name
            ));
            return Err(err);
        }

        self.inner.store.stage(staged).await;
        *lock(&self.inner.fetch_state) = FetchState {
            last_fetch_time_millis: now,
            last_fetch_status: FetchStatus::Success,
        };
        Ok(())
    }

    async fn persist_success(&self, now: u64) -> RemoteConfigResult<()> {
        self.inner
            .storage
            .set_last_successful_fetch_timestamp_millis(now)
            .await?;
        self.inner
            .storage
            .set_last_fetch_status(FetchStatus::Success)
            .await
    }

    async fn record_unsuccessful(&self, status: FetchStatus) {
        lock(&self.inner.fetch_state).last_fetch_status = status;
        if let Err(err) = self.inner.storage.set_last_fetch_status(status).await {
            LOGGER.warn(format!(
                "failed to persist fetch status '{}': {err}",
                status.as_str()
            ));
        }
    }

    /// Promotes the pending snapshot to active.
    ///
    /// Returns `false` when nothing has been fetched since the last activation. The snapshot is
    /// persisted before it becomes visible; concurrent calls consume one staged snapshot exactly
    /// once.
    pub async fn activate(&self) -> RemoteConfigResult<bool> {
        self.require_initialized()?;
        let storage = Arc::clone(&self.inner.storage);
        let changed = self
            .inner
            .store
            .promote_with(|snapshot| async move {
                storage
                    .set_active_config(StoredSnapshot::from(snapshot.as_ref()))
                    .await
            })
            .await?;
        if changed {
            LOGGER.debug(format!(
                "activated {} parameters for '{}'",
                self.inner.store.active().len(),
                self.inner.name
            ));
        }
        Ok(changed)
    }

    /// Fetches and, when the fetch succeeds, activates the result.
    pub async fn fetch_and_activate(&self) -> RemoteConfigResult<bool> {
        self.fetch().await?;
        self.activate().await
    }

    pub fn fetch_state(&self) -> FetchState {
        *lock(&self.inner.fetch_state)
    }

    /// Completion time of the last successful fetch in milliseconds since the epoch, `0` before
    /// any.
    pub fn fetch_time_millis(&self) -> u64 {
        self.fetch_state().last_fetch_time_millis
    }

    pub fn last_fetch_status(&self) -> FetchStatus {
        self.fetch_state().last_fetch_status
    }

    pub fn info(&self) -> RemoteConfigInfo {
        RemoteConfigInfo {
            settings: self.settings(),
            fetch_state: self.fetch_state(),
        }
    }

    /// Returns the template version of the currently active configuration, if known.
    pub fn active_template_version(&self) -> Option<u64> {
        self.inner
            .store
            .activated()
            .and_then(|active| active.template_version())
    }

    /// Returns a value wrapper that exposes typed accessors and the source of the parameter.
    pub fn get_value(&self, key: &str) -> RemoteConfigValue {
        self.inner.store.get(key)
    }

    pub fn get_string(&self, key: &str) -> String {
        self.get_value(key).as_string()
    }

    /// `true` for `"true"` or `"1"` (case-insensitive), `false` otherwise.
    pub fn get_boolean(&self, key: &str) -> bool {
        self.get_value(key).as_bool()
    }

    /// Decimal value of the parameter; malformed values read as `0.0`.
    pub fn get_number(&self, key: &str) -> f64 {
        self.get_value(key).as_number()
    }

    pub fn get_bytes(&self, key: &str) -> Vec<u8> {
        self.get_value(key).as_bytes().to_vec()
    }

    /// Returns the union of default and active values, with active values taking precedence.
    pub fn get_all(&self) -> HashMap<String, RemoteConfigValue> {
        self.inner.store.all()
    }

    pub fn get_keys_by_prefix(&self, prefix: &str) -> BTreeSet<String> {
        self.inner.store.keys_by_prefix(prefix)
    }
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("name", &self.inner.name)
            .field("defaults", &self.inner.store.defaults().len())
            .field("last_fetch_status", &self.last_fetch_status().as_str())
            .finish()
    }
}

fn current_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote_config::error::{
        client_network, internal_error, ClientErrorReason, RemoteConfigErrorCode,
    };
    use crate::remote_config::storage::FileRemoteConfigStorage;
    use crate::remote_config::value::RemoteConfigValueSource;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Replays queued responses; an exhausted queue behaves like an unreachable backend.
    struct StubFetchClient {
        responses: Mutex<VecDeque<RemoteConfigResult<FetchResponse>>>,
        requests: Mutex<Vec<FetchRequest>>,
    }

    impl StubFetchClient {
        fn new(responses: Vec<RemoteConfigResult<FetchResponse>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<FetchRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl RemoteConfigFetchClient for StubFetchClient {
        async fn fetch(&self, request: FetchRequest) -> RemoteConfigResult<FetchResponse> {
            self.requests.lock().unwrap().push(request);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(client_network("no response queued")))
        }
    }

    struct SlowFetchClient;

    #[async_trait::async_trait]
    impl RemoteConfigFetchClient for SlowFetchClient {
        async fn fetch(&self, _request: FetchRequest) -> RemoteConfigResult<FetchResponse> {
            runtime::sleep(Duration::from_secs(30)).await;
            Ok(FetchResponse::Template(Snapshot::empty()))
        }
    }

    fn template(entries: &[(&str, &str)]) -> FetchResponse {
        FetchResponse::Template(Snapshot::from_entries(
            RemoteConfigValueSource::Remote,
            entries.iter().map(|(key, value)| (key.to_string(), value.to_string())),
        ))
    }

    async fn initialized(name: &str) -> RemoteConfig {
        let rc = RemoteConfig::new(name);
        rc.ensure_initialized().await.unwrap();
        rc
    }

    #[tokio::test(flavor = "current_thread")]
    async fn fetch_requires_initialization() {
        let rc = RemoteConfig::new("uninitialized");
        let err = rc.fetch().await.unwrap_err();
        assert_eq!(err.code, RemoteConfigErrorCode::NotInitialized);
        let err = rc.activate().await.unwrap_err();
        assert_eq!(err.code, RemoteConfigErrorCode::NotInitialized);
        assert_eq!(rc.last_fetch_status(), FetchStatus::NoFetchYet);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn fresh_instance_reports_defaults() {
        let rc = initialized("fresh").await;
        assert_eq!(rc.last_fetch_status(), FetchStatus::NoFetchYet);
        assert_eq!(rc.fetch_time_millis(), 0);
        assert_eq!(rc.settings(), RemoteConfigSettings::default());
        rc.ensure_initialized().await.unwrap();
    }

    #[tokio::test(flavor = "current_thread")]
    async fn activate_without_fetch_keeps_defaults() {
        let rc = initialized("no-fetch").await;
        rc.set_defaults(HashMap::from([(String::from("welcome"), json!("hello"))]))
            .unwrap();

        assert!(!rc.activate().await.unwrap());
        let value = rc.get_value("welcome");
        assert_eq!(value.as_string(), "hello");
        assert_eq!(value.source(), RemoteConfigValueSource::Default);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn fetch_and_activate_serves_remote_values() {
        let rc = initialized("remote").await;
        rc.set_defaults(HashMap::from([
            (String::from("feature"), json!(false)),
            (String::from("fallback"), json!(3)),
        ]))
        .unwrap();
        rc.set_fetch_client(StubFetchClient::new(vec![Ok(template(&[(
            "feature", "TRUE",
        )]))]));

        assert!(rc.fetch_and_activate().await.unwrap());
        assert_eq!(rc.last_fetch_status(), FetchStatus::Success);
        assert!(rc.fetch_time_millis() > 0);

        let feature = rc.get_value("feature");
        assert_eq!(feature.source(), RemoteConfigValueSource::Remote);
        assert!(feature.as_bool());
        let fallback = rc.get_value("fallback");
        assert_eq!(fallback.source(), RemoteConfigValueSource::Default);
        assert_eq!(rc.get_number("fallback"), 3.0);
        assert_eq!(rc.get_value("missing").source(), RemoteConfigValueSource::Static);

        assert!(!rc.activate().await.unwrap());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn pending_values_are_not_readable() {
        let rc = initialized("pending").await;
        rc.set_config_settings(RemoteConfigSettings::new(60, 0).unwrap());
        rc.set_fetch_client(StubFetchClient::new(vec![Ok(template(&[("color", "blue")]))]));

        rc.fetch().await.unwrap();
        assert_eq!(rc.get_value("color").source(), RemoteConfigValueSource::Static);
        assert!(rc.activate().await.unwrap());
        assert_eq!(rc.get_string("color"), "blue");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn second_fetch_within_interval_is_throttled() {
        let rc = initialized("throttled").await;
        rc.set_config_settings(RemoteConfigSettings::new(60, 3_600).unwrap());
        let client = StubFetchClient::new(vec![Ok(template(&[("a", "1")]))]);
        rc.set_fetch_client(client.clone());

        rc.fetch().await.unwrap();
        let fetched_at = rc.fetch_time_millis();

        let err = rc.fetch().await.unwrap_err();
        assert!(err.is_throttled());
        assert_eq!(rc.last_fetch_status(), FetchStatus::Throttled);
        assert_eq!(rc.fetch_time_millis(), fetched_at);
        assert_eq!(client.requests().len(), 1);

        // A throttled status does not itself throttle the next attempt.
        let err = rc.fetch().await.unwrap_err();
        assert_eq!(err.client_reason(), Some(ClientErrorReason::Network));
        assert_eq!(client.requests().len(), 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn failure_never_throttles_the_next_fetch() {
        let rc = initialized("failure").await;
        rc.set_config_settings(RemoteConfigSettings::new(60, 3_600).unwrap());
        rc.set_fetch_client(StubFetchClient::new(vec![
            Err(client_network("offline")),
            Ok(template(&[("a", "1")])),
        ]));

        let err = rc.fetch().await.unwrap_err();
        assert_eq!(err.message(), "offline");
        assert_eq!(rc.last_fetch_status(), FetchStatus::Failure);
        assert_eq!(rc.fetch_time_millis(), 0);

        rc.fetch().await.unwrap();
        assert_eq!(rc.last_fetch_status(), FetchStatus::Success);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn fetch_error_skips_activation() {
        let rc = initialized("fetch-error").await;
        rc.set_fetch_client(StubFetchClient::new(vec![Err(client_network("offline"))]));

        assert!(rc.fetch_and_activate().await.is_err());
        assert!(rc.get_all().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn slow_client_times_out() {
        let rc = initialized("slow").await;
        rc.set_config_settings(RemoteConfigSettings::new(1, 0).unwrap());
        rc.set_fetch_client(Arc::new(SlowFetchClient));

        let err = rc.fetch().await.unwrap_err();
        assert_eq!(err.client_reason(), Some(ClientErrorReason::Timeout));
        assert_eq!(rc.last_fetch_status(), FetchStatus::Failure);
    }

    /// In-memory storage whose success timestamp writes fail.
    #[derive(Default)]
    struct TimestampFailingStorage {
        inner: InMemoryRemoteConfigStorage,
    }

    #[async_trait::async_trait]
    impl RemoteConfigStorage for TimestampFailingStorage {
        async fn get_last_fetch_status(&self) -> RemoteConfigResult<Option<FetchStatus>> {
            self.inner.get_last_fetch_status().await
        }

        async fn set_last_fetch_status(&self, status: FetchStatus) -> RemoteConfigResult<()> {
            self.inner.set_last_fetch_status(status).await
        }

        async fn get_last_successful_fetch_timestamp_millis(
            &self,
        ) -> RemoteConfigResult<Option<u64>> {
            self.inner.get_last_successful_fetch_timestamp_millis().await
        }

        async fn set_last_successful_fetch_timestamp_millis(
            &self,
            _timestamp: u64,
        ) -> RemoteConfigResult<()> {
            Err(internal_error("disk full"))
        }

        async fn get_active_config(&self) -> RemoteConfigResult<Option<StoredSnapshot>> {
            self.inner.get_active_config().await
        }

        async fn set_active_config(&self, config: StoredSnapshot) -> RemoteConfigResult<()> {
            self.inner.set_active_config(config).await
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unrecorded_fetch_is_not_staged() {
        let storage = Arc::new(TimestampFailingStorage::default());
        let rc = RemoteConfig::with_storage("unrecorded", storage.clone());
        rc.ensure_initialized().await.unwrap();
        rc.set_config_settings(RemoteConfigSettings::new(60, 3_600).unwrap());
        let client = StubFetchClient::new(vec![
            Ok(template(&[("k", "first")])),
            Ok(template(&[("k", "second")])),
        ]);
        rc.set_fetch_client(client.clone());

        let err = rc.fetch().await.unwrap_err();
        assert_eq!(err.code, RemoteConfigErrorCode::Internal);
        assert_eq!(err.message(), "disk full");
        assert_eq!(rc.last_fetch_status(), FetchStatus::Failure);
        assert_eq!(rc.fetch_time_millis(), 0);
        assert_eq!(
            storage.get_last_fetch_status().await.unwrap(),
            Some(FetchStatus::Failure)
        );
        assert!(!rc.activate().await.unwrap());
        assert_eq!(rc.get_value("k").source(), RemoteConfigValueSource::Static);

        // The failed bookkeeping does not throttle the retry.
        let err = rc.fetch().await.unwrap_err();
        assert_eq!(err.code, RemoteConfigErrorCode::Internal);
        assert_eq!(client.requests().len(), 2);
    }

    /// The first request is answered after the second one.
    struct StaggeredFetchClient {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl RemoteConfigFetchClient for StaggeredFetchClient {
        async fn fetch(&self, _request: FetchRequest) -> RemoteConfigResult<FetchResponse> {
            let (delay, value) = if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                (Duration::from_millis(300), "slow")
            } else {
                (Duration::from_millis(20), "fast")
            };
            runtime::sleep(delay).await;
            Ok(template(&[("winner", value)]))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn last_completed_fetch_wins_pending() {
        let rc = initialized("staggered").await;
        rc.set_config_settings(RemoteConfigSettings::new(5, 0).unwrap());
        let client = Arc::new(StaggeredFetchClient {
            calls: AtomicUsize::new(0),
        });
        rc.set_fetch_client(client.clone());

        let first = tokio::spawn({
            let rc = rc.clone();
            async move { rc.fetch().await }
        });
        while client.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        let second = tokio::spawn({
            let rc = rc.clone();
            async move { rc.fetch().await }
        });

        second.await.unwrap().unwrap();
        first.await.unwrap().unwrap();
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);

        assert!(rc.activate().await.unwrap());
        assert_eq!(rc.get_string("winner"), "slow");
        assert!(!rc.activate().await.unwrap());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn not_modified_restages_active_snapshot() {
        let rc = initialized("not-modified").await;
        rc.set_config_settings(RemoteConfigSettings::new(60, 0).unwrap());
        let client = StubFetchClient::new(vec![
            Ok(FetchResponse::Template(
                Snapshot::from_entries(RemoteConfigValueSource::Remote, [("k", "v")])
                    .with_etag(Some(String::from("etag-1")))
                    .with_template_version(Some(3)),
            )),
            Ok(FetchResponse::NotModified),
        ]);
        rc.set_fetch_client(client.clone());

        assert!(rc.fetch_and_activate().await.unwrap());
        assert!(rc.fetch_and_activate().await.unwrap());
        assert_eq!(rc.get_string("k"), "v");
        assert_eq!(rc.active_template_version(), Some(3));
        let requests = client.requests();
        assert_eq!(requests[0].e_tag, None);
        assert_eq!(requests[1].e_tag.as_deref(), Some("etag-1"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_activations_consume_pending_once() {
        for round in 0..20 {
            let rc = initialized(&format!("race-{round}")).await;
            rc.set_fetch_client(StubFetchClient::new(vec![Ok(template(&[("k", "v")]))]));
            rc.fetch().await.unwrap();

            let tasks: Vec<_> = (0..4)
                .map(|_| {
                    let rc = rc.clone();
                    tokio::spawn(async move { rc.activate().await.unwrap() })
                })
                .collect();
            let mut changed = 0;
            for task in tasks {
                if task.await.unwrap() {
                    changed += 1;
                }
            }
            assert_eq!(changed, 1);
            assert_eq!(rc.get_string("k"), "v");
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn null_defaults_are_rejected() {
        let rc = RemoteConfig::new("null-defaults");
        rc.set_defaults(HashMap::from([(String::from("kept"), json!("yes"))]))
            .unwrap();
        let err = rc
            .set_defaults(HashMap::from([(String::from("bad"), JsonValue::Null)]))
            .unwrap_err();
        assert_eq!(err.code, RemoteConfigErrorCode::InvalidArgument);
        assert_eq!(rc.get_string("kept"), "yes");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn keys_by_prefix_spans_layers() {
        let rc = initialized("prefix").await;
        rc.set_defaults(HashMap::from([
            (String::from("ui.color"), json!("red")),
            (String::from("api.url"), json!("https://example.com")),
        ]))
        .unwrap();
        rc.set_fetch_client(StubFetchClient::new(vec![Ok(template(&[("ui.size", "10")]))]));
        rc.fetch_and_activate().await.unwrap();

        let keys: Vec<_> = rc.get_keys_by_prefix("ui.").into_iter().collect();
        assert_eq!(keys, ["ui.color", "ui.size"]);
        assert_eq!(rc.get_keys_by_prefix("").len(), 3);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn storage_hydrates_new_instances() {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let path = std::env::temp_dir().join(format!(
            "remote-config-api-storage-{}-{}.json",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::SeqCst)
        ));

        let storage: Arc<dyn RemoteConfigStorage> =
            Arc::new(FileRemoteConfigStorage::new(path.clone()).unwrap());
        let rc = RemoteConfig::with_storage("persisted", storage);
        rc.ensure_initialized().await.unwrap();
        rc.set_fetch_client(StubFetchClient::new(vec![Ok(FetchResponse::Template(
            Snapshot::from_entries(RemoteConfigValueSource::Remote, [("motd", "hello")])
                .with_template_version(Some(5)),
        ))]));
        rc.fetch_and_activate().await.unwrap();
        let fetched_at = rc.fetch_time_millis();
        drop(rc);

        let storage: Arc<dyn RemoteConfigStorage> =
            Arc::new(FileRemoteConfigStorage::new(path.clone()).unwrap());
        let restored = RemoteConfig::with_storage("persisted", storage);
        assert_eq!(restored.get_value("motd").source(), RemoteConfigValueSource::Static);
        restored.ensure_initialized().await.unwrap();

        let value = restored.get_value("motd");
        assert_eq!(value.source(), RemoteConfigValueSource::Remote);
        assert_eq!(value.as_string(), "hello");
        assert_eq!(restored.active_template_version(), Some(5));
        assert_eq!(restored.last_fetch_status(), FetchStatus::Success);
        assert_eq!(restored.fetch_time_millis(), fetched_at);

        let _ = fs::remove_file(path);
    }
}
