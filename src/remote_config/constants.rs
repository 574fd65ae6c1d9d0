pub const REMOTE_CONFIG_LOGGER_NAME: &str = "@remote-config/service";
pub const REMOTE_CONFIG_API_URL: &str = "https://firebaseremoteconfig.googleapis.com";
pub const DEFAULT_NAMESPACE: &str = "firebase";
pub const DEFAULT_LANGUAGE_CODE: &str = "en-US";
pub const DEFAULT_INSTANCE_NAME: &str = "[DEFAULT]";
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
