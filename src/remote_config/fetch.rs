//! Fetch client abstractions.
//!
//! The controller only depends on [`RemoteConfigFetchClient`], so the REST client below, the
//! no-op client and test stubs are interchangeable.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::remote_config::constants::{
    DEFAULT_LANGUAGE_CODE, DEFAULT_NAMESPACE, REMOTE_CONFIG_API_URL, SDK_VERSION,
};
use crate::remote_config::error::{
    client_network, client_timeout, internal_error, invalid_argument, RemoteConfigError,
    RemoteConfigResult,
};
use crate::remote_config::snapshot::Snapshot;
use crate::remote_config::value::RemoteConfigValueSource;

/// Parameters describing a fetch attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchRequest {
    /// Time budget for the whole request.
    pub timeout: Duration,
    /// Entity tag of the active snapshot, sent as `If-None-Match`.
    pub e_tag: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchResponse {
    /// A full parameter set; every entry is tagged [`RemoteConfigValueSource::Remote`].
    Template(Snapshot),
    /// The backend reported that the active template is still current.
    NotModified,
}

#[async_trait::async_trait]
pub trait RemoteConfigFetchClient: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> RemoteConfigResult<FetchResponse>;
}

/// Fetch client that always returns an empty template.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopFetchClient;

#[async_trait::async_trait]
impl RemoteConfigFetchClient for NoopFetchClient {
    async fn fetch(&self, _request: FetchRequest) -> RemoteConfigResult<FetchResponse> {
        Ok(FetchResponse::Template(Snapshot::empty()))
    }
}

/// Connection settings for [`HttpRemoteConfigFetchClient`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpFetchClientOptions {
    pub base_url: String,
    pub project_id: String,
    pub namespace: String,
    pub api_key: String,
    pub app_id: String,
    pub app_instance_id: String,
    pub sdk_version: String,
    pub language_code: String,
}

impl Default for HttpFetchClientOptions {
    fn default() -> Self {
        Self {
            base_url: REMOTE_CONFIG_API_URL.to_string(),
            project_id: String::new(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            api_key: String::new(),
            app_id: String::new(),
            app_instance_id: String::new(),
            sdk_version: SDK_VERSION.to_string(),
            language_code: DEFAULT_LANGUAGE_CODE.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct RestFetchResponse {
    #[serde(default)]
    entries: Option<HashMap<String, String>>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default, rename = "templateVersion")]
    template_version: Option<u64>,
}

/// REST client for the `namespaces/{namespace}:fetch` endpoint.
pub struct HttpRemoteConfigFetchClient {
    client: Client,
    endpoint: Url,
    options: HttpFetchClientOptions,
}

impl HttpRemoteConfigFetchClient {
    pub fn new(options: HttpFetchClientOptions) -> RemoteConfigResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|err| internal_error(format!("failed to build HTTP client: {err}")))?;
        Self::with_client(client, options)
    }

    pub fn with_client(client: Client, options: HttpFetchClientOptions) -> RemoteConfigResult<Self> {
        if options.project_id.is_empty() {
            return Err(invalid_argument("project_id is required for remote config fetches"));
        }
        let endpoint = build_endpoint(&options)?;
        Ok(Self {
            client,
            endpoint,
            options,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn build_headers(&self, e_tag: Option<&str>) -> RemoteConfigResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            IF_NONE_MATCH,
            HeaderValue::from_str(e_tag.unwrap_or("*"))
                .map_err(|err| invalid_argument(format!("invalid ETag: {err}")))?,
        );
        Ok(headers)
    }
}

fn build_endpoint(options: &HttpFetchClientOptions) -> RemoteConfigResult<Url> {
    let base = Url::parse(&options.base_url)
        .map_err(|err| invalid_argument(format!("invalid base URL '{}': {err}", options.base_url)))?;
    let path = format!(
        "v1/projects/{}/namespaces/{}:fetch",
        options.project_id, options.namespace
    );
    let mut endpoint = base
        .join(&path)
        .map_err(|err| invalid_argument(format!("invalid fetch endpoint: {err}")))?;
    if !options.api_key.is_empty() {
        endpoint.query_pairs_mut().append_pair("key", &options.api_key);
    }
    Ok(endpoint)
}

fn map_transport_error(err: reqwest::Error) -> RemoteConfigError {
    if err.is_timeout() {
        client_timeout(format!("remote config fetch timed out: {err}"))
    } else {
        client_network(format!("remote config fetch failed: {err}"))
    }
}

#[async_trait::async_trait]
impl RemoteConfigFetchClient for HttpRemoteConfigFetchClient {
    async fn fetch(&self, request: FetchRequest) -> RemoteConfigResult<FetchResponse> {
        let headers = self.build_headers(request.e_tag.as_deref())?;
        let body = json!({
            "sdk_version": self.options.sdk_version,
            "app_instance_id": self.options.app_instance_id,
            "app_id": self.options.app_id,
            "language_code": self.options.language_code,
        });

        let response = self
            .client
            .post(self.endpoint.clone())
            .headers(headers)
            .json(&body)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(FetchResponse::NotModified);
        }
        if status != StatusCode::OK {
            return Err(client_network(format!(
                "fetch returned unexpected status {}",
                status.as_u16()
            )));
        }

        let e_tag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response.json::<RestFetchResponse>().await.map_err(|err| {
            if err.is_timeout() {
                map_transport_error(err)
            } else {
                client_network(format!("failed to parse remote config response: {err}"))
            }
        })?;

        let entries = match body.state.as_deref() {
            Some("NO_CHANGE") => return Ok(FetchResponse::NotModified),
            Some("INSTANCE_STATE_UNSPECIFIED") => {
                return Err(client_network("backend reported an unspecified instance state"))
            }
            Some("NO_TEMPLATE") | Some("EMPTY_CONFIG") => HashMap::new(),
            _ => body.entries.unwrap_or_default(),
        };

        Ok(FetchResponse::Template(
            Snapshot::from_entries(RemoteConfigValueSource::Remote, entries)
                .with_etag(e_tag)
                .with_template_version(body.template_version),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote_config::error::ClientErrorReason;
    use crate::test_support::start_mock_server;
    use httpmock::prelude::*;

    fn options(base_url: String) -> HttpFetchClientOptions {
        HttpFetchClientOptions {
            base_url,
            project_id: String::from("demo-project"),
            api_key: String::from("test-key"),
            app_id: String::from("1:123:web:abc"),
            app_instance_id: String::from("instance-1"),
            ..Default::default()
        }
    }

    fn request() -> FetchRequest {
        FetchRequest {
            timeout: Duration::from_secs(5),
            e_tag: None,
        }
    }

    #[test]
    fn endpoint_includes_namespace_and_key() {
        let client =
            HttpRemoteConfigFetchClient::new(options(String::from("https://rc.example.com/")))
                .unwrap();
        assert_eq!(
            client.endpoint().as_str(),
            "https://rc.example.com/v1/projects/demo-project/namespaces/firebase:fetch?key=test-key"
        );
    }

    #[test]
    fn missing_project_is_rejected() {
        let err = HttpRemoteConfigFetchClient::new(HttpFetchClientOptions::default())
            .err()
            .unwrap();
        assert_eq!(err.code_str(), "remote-config/invalid-argument");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn noop_client_returns_empty_template() {
        let response = NoopFetchClient.fetch(request()).await.unwrap();
        assert_eq!(response, FetchResponse::Template(Snapshot::empty()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ok_response_becomes_remote_snapshot() {
        let server = start_mock_server().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/projects/demo-project/namespaces/firebase:fetch")
                    .query_param("key", "test-key")
                    .header("if-none-match", "*")
                    .json_body_partial(r#"{"app_instance_id":"instance-1"}"#);
                then.status(200)
                    .header("etag", "etag-1")
                    .json_body(serde_json::json!({
                        "entries": {"welcome": "hi", "enabled": "true"},
                        "state": "UPDATE",
                        "templateVersion": 4
                    }));
            })
            .await;

        let client = HttpRemoteConfigFetchClient::new(options(server.base_url())).unwrap();
        let response = client.fetch(request()).await.unwrap();

        mock.assert_async().await;
        let FetchResponse::Template(snapshot) = response else {
            panic!("expected a template");
        };
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.etag(), Some("etag-1"));
        assert_eq!(snapshot.template_version(), Some(4));
        let welcome = snapshot.get("welcome").unwrap();
        assert_eq!(welcome.source(), RemoteConfigValueSource::Remote);
        assert_eq!(welcome.raw_value().as_ref(), b"hi");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn not_modified_and_empty_states_are_mapped() {
        let server = start_mock_server().await;
        server
            .mock_async(|when, then| {
                when.method(POST).header("if-none-match", "etag-1");
                then.status(304);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).header("if-none-match", "*");
                then.status(200)
                    .json_body(serde_json::json!({ "state": "NO_TEMPLATE" }));
            })
            .await;

        let client = HttpRemoteConfigFetchClient::new(options(server.base_url())).unwrap();
        let not_modified = client
            .fetch(FetchRequest {
                e_tag: Some(String::from("etag-1")),
                ..request()
            })
            .await
            .unwrap();
        assert_eq!(not_modified, FetchResponse::NotModified);

        let empty = client.fetch(request()).await.unwrap();
        assert_eq!(empty, FetchResponse::Template(Snapshot::empty()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_errors_are_network_failures() {
        let server = start_mock_server().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(503);
            })
            .await;

        let client = HttpRemoteConfigFetchClient::new(options(server.base_url())).unwrap();
        let err = client.fetch(request()).await.unwrap_err();
        assert_eq!(err.client_reason(), Some(ClientErrorReason::Network));
        assert!(err.message().contains("503"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn slow_backend_times_out() {
        let server = start_mock_server().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200)
                    .delay(Duration::from_millis(500))
                    .json_body(serde_json::json!({ "entries": {} }));
            })
            .await;

        let client = HttpRemoteConfigFetchClient::new(options(server.base_url())).unwrap();
        let err = client
            .fetch(FetchRequest {
                timeout: Duration::from_millis(50),
                e_tag: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.client_reason(), Some(ClientErrorReason::Timeout));
    }
}
