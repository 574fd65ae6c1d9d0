//! Drive named instances through the typed operation surface, the way a host bridge would.

use std::collections::HashMap;
use std::sync::Arc;

use remote_config_rs::logger::{self, LogLevel};
use remote_config_rs::remote_config::constants::DEFAULT_INSTANCE_NAME;
use remote_config_rs::remote_config::{
    submit, RemoteConfigOperation, RemoteConfigRegistry, RemoteConfigReply, RemoteConfigRequest,
};
use serde_json::json;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logger::set_log_level(LogLevel::Debug)?;
    let registry = Arc::new(RemoteConfigRegistry::new());

    let operations = [
        RemoteConfigOperation::EnsureInitialized,
        RemoteConfigOperation::SetConfigSettings {
            fetch_timeout_seconds: 10,
            minimum_fetch_interval_seconds: 3_600,
        },
        RemoteConfigOperation::SetDefaults {
            defaults: HashMap::from([
                (String::from("theme"), json!("dark")),
                (String::from("max_uploads"), json!(3)),
            ]),
        },
        RemoteConfigOperation::FetchAndActivate,
        // Within the minimum fetch interval, so this one is throttled.
        RemoteConfigOperation::Fetch,
        RemoteConfigOperation::GetPluginConstants,
    ];

    for operation in operations {
        let method = operation.method_name();
        match submit(registry.clone(), RemoteConfigRequest::new(DEFAULT_INSTANCE_NAME, operation)).await {
            Ok(RemoteConfigReply::Unit) => println!("{method}: ok"),
            Ok(reply) => println!("{method}: {}", serde_json::to_string(&reply)?),
            Err(payload) => println!("{method}: {}", serde_json::to_string(&payload)?),
        }
    }

    Ok(())
}
