//! Typed access to stored parameter values.
//!
//! Raw values are kept as bytes; the accessors below apply a lenient coercion policy in which
//! malformed input yields the type's default (`false`, `0.0`) instead of an error.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Indicates where a value originated from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteConfigValueSource {
    /// Fallback used when the key has no remote or default entry.
    Static,
    /// Value supplied locally through `set_defaults`.
    Default,
    /// Value fetched from the backend and activated.
    Remote,
}

impl RemoteConfigValueSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteConfigValueSource::Static => "static",
            RemoteConfigValueSource::Default => "default",
            RemoteConfigValueSource::Remote => "remote",
        }
    }
}

/// A parameter value together with its source tag.
///
/// Missing keys map to a static value whose raw representation is empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteConfigValue {
    source: RemoteConfigValueSource,
    value: Bytes,
}

impl RemoteConfigValue {
    const DEFAULT_NUMBER: f64 = 0.0;
    const BOOLEAN_TRUTHY_VALUES: [&'static str; 2] = ["true", "1"];

    pub fn new(source: RemoteConfigValueSource, value: impl Into<Bytes>) -> Self {
        Self {
            source,
            value: value.into(),
        }
    }

    pub fn static_value() -> Self {
        Self::new(RemoteConfigValueSource::Static, Bytes::new())
    }

    /// Returns the raw stored bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.value
    }

    /// Returns the raw value decoded as UTF-8; invalid sequences are replaced.
    ///
    /// # Examples
    ///
    /// ```
    /// use remote_config_rs::remote_config::value::RemoteConfigValue;
    ///
    /// let value = RemoteConfigValue::default();
    /// assert_eq!(value.as_string(), "");
    /// ```
    pub fn as_string(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }

    /// Returns `true` for case-insensitive `"true"` or `"1"`, and `false` for anything else.
    ///
    /// ```
    /// use remote_config_rs::remote_config::value::{RemoteConfigValue, RemoteConfigValueSource};
    ///
    /// assert!(RemoteConfigValue::new(RemoteConfigValueSource::Remote, "TRUE").as_bool());
    /// assert!(!RemoteConfigValue::new(RemoteConfigValueSource::Remote, "yes").as_bool());
    /// ```
    pub fn as_bool(&self) -> bool {
        let text = self.as_string();
        let text = text.trim();
        Self::BOOLEAN_TRUTHY_VALUES
            .iter()
            .any(|truthy| text.eq_ignore_ascii_case(truthy))
    }

    /// Returns the value parsed as a decimal number.
    ///
    /// Unparseable or non-finite input yields `0.0`.
    pub fn as_number(&self) -> f64 {
        match self.as_string().trim().parse::<f64>() {
            Ok(parsed) if parsed.is_finite() => parsed,
            _ => Self::DEFAULT_NUMBER,
        }
    }

    pub fn source(&self) -> RemoteConfigValueSource {
        self.source
    }
}

impl Default for RemoteConfigValue {
    fn default() -> Self {
        Self::static_value()
    }
}
