//! Fetch the latest template from the REST backend, activate it, and read typed values.
//!
//! Replace the placeholder project credentials before running so the demo can talk to the
//! backend. Set `REMOTE_CONFIG_LANGUAGE_CODE` to override the default `en-US` language hint.

use std::collections::HashMap;
use std::sync::Arc;

use remote_config_rs::remote_config::constants::DEFAULT_INSTANCE_NAME;
use remote_config_rs::remote_config::{
    HttpFetchClientOptions, HttpRemoteConfigFetchClient, RemoteConfig, RemoteConfigSettings,
};
use serde_json::json;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut options = HttpFetchClientOptions {
        project_id: "your-project-id".into(),
        api_key: "AIza_your_api_key".into(),
        app_id: "1:1234567890:web:abc123def456".into(),
        app_instance_id: "demo-installation".into(),
        ..Default::default()
    };
    if let Ok(language_code) = std::env::var("REMOTE_CONFIG_LANGUAGE_CODE") {
        options.language_code = language_code;
    }

    let remote_config = RemoteConfig::new(DEFAULT_INSTANCE_NAME);
    remote_config.set_fetch_client(Arc::new(HttpRemoteConfigFetchClient::new(options)?));
    remote_config.set_config_settings(RemoteConfigSettings::new(30, 0)?);
    remote_config.ensure_initialized().await?;

    // Local defaults apply immediately and are used when the backend has no value for a key.
    remote_config.set_defaults(HashMap::from([
        (String::from("welcome_message"), json!("Hello from defaults")),
        (String::from("feature_enabled"), json!(false)),
    ]))?;

    match remote_config.fetch_and_activate().await {
        Ok(true) => println!("Fetched and activated fresh parameters"),
        Ok(false) => println!("Using previously activated parameters"),
        Err(err) => println!("Fetch failed, serving defaults: {err}"),
    }

    let welcome = remote_config.get_string("welcome_message");
    let feature_enabled = remote_config.get_boolean("feature_enabled");
    let source = remote_config.get_value("welcome_message").source().as_str();

    println!("welcome_message ({source}): {welcome}");
    println!("feature_enabled: {feature_enabled}");

    Ok(())
}
