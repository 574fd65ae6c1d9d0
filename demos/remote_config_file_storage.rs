//! Persist the activated configuration across runs using the file-backed storage.
//!
//! This demo swaps in a static fetch client so it works offline; replace it with
//! `HttpRemoteConfigFetchClient` to reach the real backend.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use remote_config_rs::remote_config::constants::DEFAULT_INSTANCE_NAME;
use remote_config_rs::remote_config::fetch::{FetchRequest, FetchResponse, RemoteConfigFetchClient};
use remote_config_rs::remote_config::snapshot::Snapshot;
use remote_config_rs::remote_config::{
    FileRemoteConfigStorage, RemoteConfig, RemoteConfigResult, RemoteConfigValueSource,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let storage_path = PathBuf::from("./remote-config-cache.json");
    let storage = Arc::new(FileRemoteConfigStorage::new(storage_path.clone())?);
    let remote_config = RemoteConfig::with_storage(DEFAULT_INSTANCE_NAME, storage);

    // Loads whatever a previous run activated.
    remote_config.ensure_initialized().await?;
    let cached = remote_config.get_value("message_of_the_day");
    println!(
        "cached message_of_the_day ({}): {}",
        cached.source().as_str(),
        cached.as_string()
    );

    remote_config.set_fetch_client(Arc::new(StaticFetchClient));
    match remote_config.fetch_and_activate().await {
        Ok(true) => println!("Wrote fresh template to {}", storage_path.display()),
        Ok(false) => println!("Nothing new to activate"),
        Err(err) if err.is_throttled() => println!("Throttled: {err}"),
        Err(err) => return Err(err.into()),
    }

    let message = remote_config.get_string("message_of_the_day");
    let source = remote_config.get_value("message_of_the_day").source().as_str();
    println!("message_of_the_day ({source}): {message}");
    println!("Restart the program to reuse cached values from {}", storage_path.display());

    Ok(())
}

struct StaticFetchClient;

#[async_trait]
impl RemoteConfigFetchClient for StaticFetchClient {
    async fn fetch(&self, _request: FetchRequest) -> RemoteConfigResult<FetchResponse> {
        Ok(FetchResponse::Template(
            Snapshot::from_entries(
                RemoteConfigValueSource::Remote,
                [("message_of_the_day", "Hello from cached remote config")],
            )
            .with_etag(Some(String::from("demo-etag")))
            .with_template_version(Some(1)),
        ))
    }
}
