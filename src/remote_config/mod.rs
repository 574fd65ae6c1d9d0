//! Remote config: layered parameter values, throttled fetches and staged activation.
//!
//! A [`RemoteConfig`] instance serves reads from its active snapshot (falling back to local
//! defaults), stages fetched templates as pending and promotes them on [`RemoteConfig::activate`].
//! Hosts that drive instances by name go through [`operations::dispatch`] or
//! [`operations::submit`].
mod api;
pub mod constants;
pub mod error;
pub mod fetch;
mod logger;
pub mod operations;
pub mod registry;
pub mod settings;
pub mod snapshot;
pub mod storage;
pub mod store;
pub mod throttle;
pub mod value;

pub use api::{RemoteConfig, RemoteConfigInfo};
pub use error::{RemoteConfigError, RemoteConfigErrorCode, RemoteConfigResult};
pub use fetch::{HttpFetchClientOptions, HttpRemoteConfigFetchClient, NoopFetchClient};
pub use operations::{
    dispatch, submit, ErrorPayload, ErrorPayloadCode, RemoteConfigOperation, RemoteConfigReply,
    RemoteConfigRequest,
};
pub use registry::RemoteConfigRegistry;
pub use settings::{RemoteConfigSettings, RemoteConfigSettingsUpdate};
pub use storage::{FetchStatus, FileRemoteConfigStorage, InMemoryRemoteConfigStorage};
pub use value::{RemoteConfigValue, RemoteConfigValueSource};
