//! Typed call surface for remote config instances.
//!
//! A [`RemoteConfigRequest`] names the instance and the operation to run. [`dispatch`] executes it
//! against a [`RemoteConfigRegistry`] and flattens every failure into an [`ErrorPayload`] with a
//! stable code, and [`submit`] does the same on the shared worker pool.

use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::platform::runtime;
use crate::remote_config::api::RemoteConfig;
use crate::remote_config::error::{RemoteConfigError, RemoteConfigErrorCode, RemoteConfigResult};
use crate::remote_config::logger::LOGGER;
use crate::remote_config::registry::RemoteConfigRegistry;
use crate::remote_config::settings::RemoteConfigSettings;
use crate::remote_config::storage::FetchStatus;
use crate::remote_config::value::{RemoteConfigValue, RemoteConfigValueSource};

#[derive(Clone, Debug, PartialEq)]
pub enum RemoteConfigOperation {
    EnsureInitialized,
    Fetch,
    Activate,
    FetchAndActivate,
    GetAll,
    GetProperties,
    /// Properties and parameters in one reply, as exposed to a host at startup.
    GetPluginConstants,
    SetConfigSettings {
        fetch_timeout_seconds: i64,
        minimum_fetch_interval_seconds: i64,
    },
    SetDefaults {
        defaults: HashMap<String, JsonValue>,
    },
}

impl RemoteConfigOperation {
    pub fn method_name(&self) -> &'static str {
        match self {
            RemoteConfigOperation::EnsureInitialized => "RemoteConfig#ensureInitialized",
            RemoteConfigOperation::Fetch => "RemoteConfig#fetch",
            RemoteConfigOperation::Activate => "RemoteConfig#activate",
            RemoteConfigOperation::FetchAndActivate => "RemoteConfig#fetchAndActivate",
            RemoteConfigOperation::GetAll => "RemoteConfig#getAll",
            RemoteConfigOperation::GetProperties => "RemoteConfig#getProperties",
            RemoteConfigOperation::GetPluginConstants => "RemoteConfig#getPluginConstants",
            RemoteConfigOperation::SetConfigSettings { .. } => "RemoteConfig#setConfigSettings",
            RemoteConfigOperation::SetDefaults { .. } => "RemoteConfig#setDefaults",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RemoteConfigRequest {
    pub app_name: String,
    pub operation: RemoteConfigOperation,
}

impl RemoteConfigRequest {
    pub fn new(app_name: impl Into<String>, operation: RemoteConfigOperation) -> Self {
        Self {
            app_name: app_name.into(),
            operation,
        }
    }
}

/// A parameter as handed to callers: raw bytes plus the layer it came from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterPayload {
    pub value: Vec<u8>,
    pub source: RemoteConfigValueSource,
}

impl From<&RemoteConfigValue> for ParameterPayload {
    fn from(value: &RemoteConfigValue) -> Self {
        Self {
            value: value.as_bytes().to_vec(),
            source: value.source(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigProperties {
    /// Seconds.
    pub fetch_timeout: u64,
    /// Seconds.
    pub minimum_fetch_interval: u64,
    /// Milliseconds since the epoch of the last successful fetch, `0` before any.
    pub last_fetch_time: u64,
    pub last_fetch_status: FetchStatus,
}

impl ConfigProperties {
    fn of(instance: &RemoteConfig) -> Self {
        let info = instance.info();
        Self {
            fetch_timeout: info.settings.fetch_timeout_seconds(),
            minimum_fetch_interval: info.settings.minimum_fetch_interval_seconds(),
            last_fetch_time: info.fetch_state.last_fetch_time_millis,
            last_fetch_status: info.fetch_state.last_fetch_status,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginConstants {
    #[serde(flatten)]
    pub properties: ConfigProperties,
    pub parameters: BTreeMap<String, ParameterPayload>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RemoteConfigReply {
    Unit,
    /// Whether an activation replaced the active snapshot.
    Changed(bool),
    Parameters(BTreeMap<String, ParameterPayload>),
    Properties(ConfigProperties),
    Constants(PluginConstants),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPayloadCode {
    Throttled,
    Internal,
    Unknown,
}

impl ErrorPayloadCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorPayloadCode::Throttled => "throttled",
            ErrorPayloadCode::Internal => "internal",
            ErrorPayloadCode::Unknown => "unknown",
        }
    }

    fn default_message(&self) -> &'static str {
        match self {
            ErrorPayloadCode::Throttled => "frequency of requests exceeds throttled limits",
            ErrorPayloadCode::Internal => "internal remote config fetch error",
            ErrorPayloadCode::Unknown => "unknown remote config error",
        }
    }
}

/// Caller-facing failure: a stable code, its fixed message, and the underlying error text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorPayloadCode,
    pub message: String,
    pub details: Option<String>,
}

impl ErrorPayload {
    fn with_code(code: ErrorPayloadCode, details: Option<String>) -> Self {
        Self {
            code,
            message: code.default_message().to_string(),
            details,
        }
    }

    pub fn unknown(details: Option<String>) -> Self {
        Self::with_code(ErrorPayloadCode::Unknown, details)
    }
}

impl From<&RemoteConfigError> for ErrorPayload {
    fn from(err: &RemoteConfigError) -> Self {
        let code = match err.code {
            RemoteConfigErrorCode::Throttled => ErrorPayloadCode::Throttled,
            RemoteConfigErrorCode::Client(_) => ErrorPayloadCode::Internal,
            RemoteConfigErrorCode::InvalidArgument
            | RemoteConfigErrorCode::NotInitialized
            | RemoteConfigErrorCode::Internal => ErrorPayloadCode::Unknown,
        };
        Self::with_code(code, Some(err.to_string()))
    }
}

impl Display for ErrorPayload {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code.as_str())?;
        if let Some(details) = &self.details {
            write!(f, ": {details}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorPayload {}

fn parameters(instance: &RemoteConfig) -> BTreeMap<String, ParameterPayload> {
    instance
        .get_all()
        .iter()
        .map(|(key, value)| (key.clone(), ParameterPayload::from(value)))
        .collect()
}

async fn execute(
    registry: &RemoteConfigRegistry,
    request: RemoteConfigRequest,
) -> RemoteConfigResult<RemoteConfigReply> {
    let instance = registry.get_or_create(&request.app_name)?;
    let reply = match request.operation {
        RemoteConfigOperation::EnsureInitialized => {
            instance.ensure_initialized().await?;
            RemoteConfigReply::Unit
        }
        RemoteConfigOperation::Fetch => {
            instance.fetch().await?;
            RemoteConfigReply::Unit
        }
        RemoteConfigOperation::Activate => RemoteConfigReply::Changed(instance.activate().await?),
        RemoteConfigOperation::FetchAndActivate => {
            RemoteConfigReply::Changed(instance.fetch_and_activate().await?)
        }
        RemoteConfigOperation::GetAll => RemoteConfigReply::Parameters(parameters(&instance)),
        RemoteConfigOperation::GetProperties => {
            RemoteConfigReply::Properties(ConfigProperties::of(&instance))
        }
        RemoteConfigOperation::GetPluginConstants => RemoteConfigReply::Constants(PluginConstants {
            properties: ConfigProperties::of(&instance),
            parameters: parameters(&instance),
        }),
        RemoteConfigOperation::SetConfigSettings {
            fetch_timeout_seconds,
            minimum_fetch_interval_seconds,
        } => {
            let settings =
                RemoteConfigSettings::new(fetch_timeout_seconds, minimum_fetch_interval_seconds)?;
            instance.set_config_settings(settings);
            RemoteConfigReply::Unit
        }
        RemoteConfigOperation::SetDefaults { defaults } => {
            instance.set_defaults(defaults)?;
            RemoteConfigReply::Unit
        }
    };
    Ok(reply)
}

/// Runs `request` on the calling task.
///
/// The instance named by the request is created on first use.
pub async fn dispatch(
    registry: &RemoteConfigRegistry,
    request: RemoteConfigRequest,
) -> Result<RemoteConfigReply, ErrorPayload> {
    let method = request.operation.method_name();
    let app_name = request.app_name.clone();
    execute(registry, request).await.map_err(|err| {
        LOGGER.debug(format!("{method} failed for '{app_name}': {err}"));
        ErrorPayload::from(&err)
    })
}

/// Runs `request` on the shared worker pool.
///
/// The returned future resolves once the operation completes; a worker that dies mid-operation
/// resolves to an `unknown` error payload.
pub fn submit(
    registry: Arc<RemoteConfigRegistry>,
    request: RemoteConfigRequest,
) -> impl Future<Output = Result<RemoteConfigReply, ErrorPayload>> + Send {
    let method = request.operation.method_name();
    let handle = runtime::submit(async move { dispatch(&registry, request).await });
    async move {
        match handle.await {
            Ok(reply) => reply,
            Err(err) => {
                LOGGER.error(format!("{method} worker failed: {err}"));
                Err(ErrorPayload::unknown(Some(err.to_string())))
            }
        }
    }
}
