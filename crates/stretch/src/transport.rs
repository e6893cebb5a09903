//! 📡 Transport: the one door through which every byte leaves this process.
//!
//! 🎬 *[a request is built. a header is attached. a URL is trimmed of its trailing slash.]*
//! *[somewhere, a cluster prepares to say 200. or 429. it has not decided yet.]*
//!
//! Everything above this module (the bulk pipeline, cluster health, search) only
//! ever speaks `execute(method, path, body) -> bytes`. That keeps the interesting
//! code testable with a fake transport, and keeps reqwest in exactly one file.
//!
//! 🧠 Knowledge graph:
//! - `Transport`: the trait. Method + path + optional body in, raw bytes out.
//! - `HttpTransport`: the real one. reqwest client, auth, optional gzip.
//! - Auth priority: API key beats basic auth. This is not a democracy. 🦆

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use reqwest::header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

pub use reqwest::Method;

use crate::error::{Result, StretchError};

/// 📡 Executes one request against the search service and hands back the raw body.
///
/// # Contract
/// - `path` is relative to whatever base the implementation knows about (`/_bulk`,
///   `/_cluster/health`, `/github/_search?pretty=1`).
/// - Non-2xx answers are errors. What counts as an error body is the implementor's call.
/// - Must be safe to call from many tasks at once. Bulk workers will absolutely do that.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    async fn execute(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> Result<Vec<u8>>;
}

/// 🔧 Where the cluster lives and how to talk to it.
#[derive(Debug, Deserialize, Clone)]
pub struct ConnectionConfig {
    /// 📡 Base URL, scheme and port included. `localhost` alone worked in dev. It will not work here.
    #[serde(default = "default_url")]
    pub url: String,
    /// 🔒 Basic auth username.
    #[serde(default)]
    pub username: Option<String>,
    /// 🔒 Basic auth password. "password123" is not a password. It is a confession.
    #[serde(default)]
    pub password: Option<String>,
    /// 🔒 API key, sent as `Authorization: ApiKey <key>`. Wins over basic auth.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// 🫁 gzip request bodies and say so with `Content-Encoding: gzip`.
    #[serde(default)]
    pub gzip: bool,
}

fn default_url() -> String {
    "http://localhost:9200".to_string()
}

// 🔧 10s to shake hands, 30s to get an answer. Bulk bodies can be meaty.
fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            username: None,
            password: None,
            api_key: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            gzip: false,
        }
    }
}

/// 📡 The real transport: a pooled `reqwest::Client` pointed at one cluster.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: ConnectionConfig,
}

impl HttpTransport {
    /// 🚀 Build the client. Does not touch the network; use [`HttpTransport::ping`] for that.
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|err| {
                StretchError::Transport(format!(
                    "the HTTP client refused to be born (TLS stack? system certs?): {err}"
                ))
            })?;
        Ok(Self { client, config })
    }

    /// 📡 "Hello? Is this thing on?" A GET on the root, body returned on success.
    pub async fn ping(&self) -> Result<Vec<u8>> {
        self.execute(Method::GET, "/", None).await
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    // -- trim_end_matches('/') on the base, trim_start_matches('/') on the path.
    // -- One slash of difference. Infinite suffering of difference.
    fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(ref api_key) = self.config.api_key {
            request.header(AUTHORIZATION, format!("ApiKey {api_key}"))
        } else if let Some(ref username) = self.config.username {
            request.basic_auth(username, self.config.password.as_ref())
        } else {
            request
        }
    }
}

/// 🎯 `_bulk` wants NDJSON and gets very particular about the Content-Type.
fn content_type_for(path: &str) -> &'static str {
    let bare_path = path.split('?').next().unwrap_or(path);
    if bare_path.trim_end_matches('/').ends_with("_bulk") {
        "application/x-ndjson"
    } else {
        "application/json"
    }
}

/// 🔍 Decode a response body, keeping a snippet of it in the error for the postmortem.
pub(crate) fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|err| {
        let snippet: String = String::from_utf8_lossy(bytes).chars().take(200).collect();
        StretchError::Decode(format!("{err} (body started with: {snippet})"))
    })
}

/// 🫁 Squish a body. Bandwidth is expensive and bytes are squishy.
pub(crate) fn gzip(body: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 4), Compression::default());
    let squish_failed =
        |err: std::io::Error| StretchError::Transport(format!("gzip compression failed: {err}"));
    encoder.write_all(body).map_err(squish_failed)?;
    encoder.finish().map_err(squish_failed)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> Result<Vec<u8>> {
        let url = self.url_for(path);
        debug!("📡 {} {}", method, url);

        let mut request = self.authorize(self.client.request(method, &url));
        if let Some(body) = body {
            request = request.header(CONTENT_TYPE, content_type_for(path));
            request = if self.config.gzip {
                request.header(CONTENT_ENCODING, "gzip").body(gzip(&body)?)
            } else {
                request.body(body)
            };
        }

        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            // -- 💀 The body usually names the shard having a rough morning. Keep it.
            return Err(StretchError::Http {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        trace!("✅ {} bytes back from {}", bytes.len(), url);
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport_for(server: &MockServer) -> HttpTransport {
        HttpTransport::new(ConnectionConfig {
            url: format!("{}/", server.uri()),
            ..Default::default()
        })
        .expect("💀 client should build")
    }

    #[tokio::test]
    async fn the_one_where_bulk_bodies_go_out_as_ndjson() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .and(header("content-type", "application/x-ndjson"))
            .and(body_string("{\"index\":{}}\n{}\n"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"errors":false}"#))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let bytes = transport
            .execute(Method::POST, "/_bulk", Some(b"{\"index\":{}}\n{}\n".to_vec()))
            .await
            .expect("💀 bulk POST should land");
        assert_eq!(bytes, br#"{"errors":false}"#);
    }

    #[tokio::test]
    async fn the_one_where_a_500_becomes_an_http_error_with_the_body_attached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_cluster/health"))
            .respond_with(ResponseTemplate::new(500).set_body_string("shard on fire"))
            .mount(&server)
            .await;

        let err = transport_for(&server)
            .execute(Method::GET, "_cluster/health", None)
            .await
            .expect_err("💀 a 500 should not be a success");
        match err {
            StretchError::Http { status, ref body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "shard on fire");
            }
            other => panic!("💀 expected Http error, got {other:?}"),
        }
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn the_one_where_the_api_key_wins_over_basic_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(header("authorization", "ApiKey s3cr3t"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(ConnectionConfig {
            url: server.uri(),
            username: Some("elastic".into()),
            password: Some("changeme".into()),
            api_key: Some("s3cr3t".into()),
            ..Default::default()
        })
        .expect("💀 client should build");
        transport.ping().await.expect("💀 ping should pass with api key");
    }

    #[tokio::test]
    async fn the_one_where_gzip_bodies_are_labelled_and_actually_gzipped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .and(header("content-encoding", "gzip"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(ConnectionConfig {
            url: server.uri(),
            gzip: true,
            ..Default::default()
        })
        .expect("💀 client should build");
        transport
            .execute(Method::POST, "/_bulk", Some(b"{}\n".to_vec()))
            .await
            .expect("💀 gzip POST should land");

        let requests = server.received_requests().await.expect("💀 recording is on by default");
        let mut decoded = String::new();
        GzDecoder::new(requests[0].body.as_slice())
            .read_to_string(&mut decoded)
            .expect("💀 body should be valid gzip");
        assert_eq!(decoded, "{}\n");
    }

    #[test]
    fn the_one_where_only_bulk_paths_get_ndjson() {
        assert_eq!(content_type_for("/_bulk"), "application/x-ndjson");
        assert_eq!(content_type_for("/idx/_bulk?refresh=true"), "application/x-ndjson");
        assert_eq!(content_type_for("/idx/_search"), "application/json");
    }
}
