use std::error::Error as _;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use lestash_protocol::{endpoints, ChangesQuery, ChangesResponse, StatusResponse};
use lestash_types::{DbVersion, Peer};

use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;

/// Longest slice of an error body kept in a [`SyncError::RemoteStatus`].
const MAX_ERROR_BODY: usize = 512;

/// Timeouts applied to every request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub connect_timeout_secs: u64,
    pub response_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self { connect_timeout_secs: 10, response_timeout_secs: 30 }
    }
}

/// [`SyncTransport`] over plain HTTP with `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.response_timeout_secs))
            .user_agent(concat!("lestash-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::ClientSetup(e.to_string()))?;
        Ok(Self { client })
    }

    async fn get_json<T, Q>(&self, url: &str, query: Option<&Q>) -> SyncResult<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let mut request = self.client.get(url);
        if let Some(query) = query {
            request = request.query(query);
        }
        let response = request.send().await.map_err(|e| classify(url, &e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| classify(url, &e))?;
        if !status.is_success() {
            let mut body = body;
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(SyncError::RemoteStatus { url: url.to_string(), status: status.as_u16(), body });
        }
        serde_json::from_str(&body).map_err(|e| SyncError::MalformedResponse {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn fetch_status(&self, peer: &Peer) -> SyncResult<StatusResponse> {
        let url = format!("{}{}", peer.base_url(), endpoints::STATUS);
        tracing::debug!(peer = %peer.name, %url, "fetching status");
        self.get_json::<_, ChangesQuery>(&url, None).await
    }

    async fn fetch_changes(&self, peer: &Peer, since: DbVersion) -> SyncResult<ChangesResponse> {
        let url = format!("{}{}", peer.base_url(), endpoints::CHANGES);
        tracing::debug!(peer = %peer.name, %url, since, "fetching changes");
        let response: ChangesResponse = self.get_json(&url, Some(&ChangesQuery::new(since))).await?;
        response.validate().map_err(|e| SyncError::MalformedResponse {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        Ok(response)
    }
}

/// Map a `reqwest` failure onto the sync error taxonomy.
fn classify(url: &str, err: &reqwest::Error) -> SyncError {
    let url = url.to_string();
    if err.is_timeout() {
        return SyncError::Timeout { url };
    }
    if err.is_decode() || err.is_body() {
        return SyncError::MalformedResponse { url, reason: err.to_string() };
    }
    if err.is_connect() && refused(err) {
        return SyncError::ConnectionRefused { url };
    }
    SyncError::Unreachable { url, reason: root_cause(err) }
}

fn refused(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        source = cause.source();
    }
    root_cause(err).to_lowercase().contains("connection refused")
}

fn root_cause(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message = cause.to_string();
        source = cause.source();
    }
    message
}
