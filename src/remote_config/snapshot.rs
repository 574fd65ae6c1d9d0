//! Immutable parameter sets.
//!
//! A [`Snapshot`] is produced once (by a fetch or by `set_defaults`) and then shared behind an
//! `Arc`; layers of the value store swap whole snapshots rather than editing them.

use std::collections::HashMap;

use bytes::Bytes;
use serde_json::Value as JsonValue;

use crate::remote_config::error::{invalid_argument, RemoteConfigResult};
use crate::remote_config::value::{RemoteConfigValue, RemoteConfigValueSource};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Parameter {
    name: String,
    raw_value: Bytes,
    source: RemoteConfigValueSource,
}

impl Parameter {
    pub fn new(
        name: impl Into<String>,
        raw_value: impl Into<Bytes>,
        source: RemoteConfigValueSource,
    ) -> Self {
        Self {
            name: name.into(),
            raw_value: raw_value.into(),
            source,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raw_value(&self) -> &Bytes {
        &self.raw_value
    }

    pub fn source(&self) -> RemoteConfigValueSource {
        self.source
    }

    pub fn to_value(&self) -> RemoteConfigValue {
        RemoteConfigValue::new(self.source, self.raw_value.clone())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    parameters: HashMap<String, Parameter>,
    etag: Option<String>,
    template_version: Option<u64>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a snapshot in which every entry carries `source`.
    pub fn from_entries<I, K, V>(source: RemoteConfigValueSource, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Bytes>,
    {
        let parameters = entries
            .into_iter()
            .map(|(name, raw)| {
                let name = name.into();
                (name.clone(), Parameter::new(name, raw, source))
            })
            .collect();
        Self {
            parameters,
            etag: None,
            template_version: None,
        }
    }

    /// Builds a default-tagged snapshot from JSON values.
    ///
    /// Strings are stored verbatim, numbers and booleans by their textual form, arrays and objects
    /// as JSON text. `null` has no representation and is rejected.
    pub fn from_json_defaults(defaults: HashMap<String, JsonValue>) -> RemoteConfigResult<Self> {
        let mut entries = Vec::with_capacity(defaults.len());
        for (key, value) in defaults {
            let raw = match value {
                JsonValue::String(text) => text,
                JsonValue::Bool(flag) => flag.to_string(),
                JsonValue::Number(number) => number.to_string(),
                JsonValue::Null => {
                    return Err(invalid_argument(format!(
                        "default value for '{key}' must not be null"
                    )))
                }
                other => other.to_string(),
            };
            entries.push((key, raw));
        }
        Ok(Self::from_entries(RemoteConfigValueSource::Default, entries))
    }

    pub fn with_etag(mut self, etag: Option<String>) -> Self {
        self.etag = etag;
        self
    }

    pub fn with_template_version(mut self, template_version: Option<u64>) -> Self {
        self.template_version = template_version;
        self
    }

    pub fn get(&self, key: &str) -> Option<&Parameter> {
        self.parameters.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.parameters.keys().map(String::as_str)
    }

    pub fn parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.values()
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn template_version(&self) -> Option<u64> {
        self.template_version
    }
}
