//! Candidate Source
//!
//! Fetches recommended exit servers from the VPN provider's directory
//! service. The directory's own order is kept; it is the ranking the
//! rotation truncates against.

use crate::config::DirectoryConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use tunnelguard_net::{HttpClient, HttpError};

/// A VPN exit server considered during one rotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateServer {
    /// Display name, also the CLI reconnect argument
    pub name: String,
    /// Address used for the latency probe
    pub hostname: String,
    /// Station address, or the hostname when the directory gave none
    pub ip: String,
}

impl CandidateServer {
    pub fn new(name: impl Into<String>, hostname: impl Into<String>) -> Self {
        let hostname = hostname.into();
        Self {
            name: name.into(),
            ip: hostname.clone(),
            hostname,
        }
    }
}

/// One entry of the directory response. Any field may be missing or
/// null; entries without a usable hostname are skipped.
#[derive(Debug, Deserialize)]
struct DirectoryEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default)]
    station: Option<String>,
}

impl DirectoryEntry {
    fn into_candidate(self) -> Option<CandidateServer> {
        let hostname = self
            .hostname
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())?;
        let ip = self
            .station
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| hostname.clone());

        Some(CandidateServer {
            name: self.name.unwrap_or_else(|| hostname.clone()),
            hostname,
            ip,
        })
    }
}

/// Directory service client
pub struct CandidateSource {
    client: Arc<HttpClient>,
    config: DirectoryConfig,
}

impl CandidateSource {
    pub fn new(client: Arc<HttpClient>, config: DirectoryConfig) -> Self {
        Self { client, config }
    }

    /// Full request URL, `?filters[country_id]=<id>&limit=<n>`
    pub fn request_url(&self) -> Result<String, CandidateError> {
        let url = url::Url::parse_with_params(
            &self.config.url,
            &[
                ("filters[country_id]", self.config.country_id.to_string()),
                ("limit", self.config.limit.to_string()),
            ],
        )
        .map_err(|e| CandidateError::InvalidUrl(e.to_string()))?;
        Ok(url.into())
    }

    /// Fetch candidates in directory order
    pub async fn fetch(&self) -> Result<Vec<CandidateServer>, CandidateError> {
        let url = self.request_url()?;
        let response = self.client.get(&url).await?;

        if !response.is_success() {
            return Err(CandidateError::Status(response.status.as_u16()));
        }

        let entries: Vec<DirectoryEntry> = serde_json::from_slice(&response.body)
            .map_err(|e| CandidateError::Decode(e.to_string()))?;
        let total = entries.len();

        let servers: Vec<CandidateServer> = entries
            .into_iter()
            .filter_map(DirectoryEntry::into_candidate)
            .collect();

        debug!(total, usable = servers.len(), "Fetched candidate servers");

        if servers.is_empty() {
            return Err(CandidateError::Empty);
        }
        Ok(servers)
    }
}

/// Candidate fetch errors
#[derive(Debug, thiserror::Error)]
pub enum CandidateError {
    #[error(transparent)]
    Transport(#[from] HttpError),

    #[error("Directory returned HTTP {0}")]
    Status(u16),

    #[error("Invalid directory response: {0}")]
    Decode(String),

    #[error("Directory returned no usable servers")]
    Empty,

    #[error("Invalid directory URL: {0}")]
    InvalidUrl(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::serve;
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use std::collections::HashMap;

    fn source(url: String) -> CandidateSource {
        let config = DirectoryConfig {
            url,
            country_id: 209,
            limit: 10,
        };
        CandidateSource::new(Arc::new(HttpClient::with_defaults().unwrap()), config)
    }

    #[tokio::test]
    async fn test_fetch_keeps_directory_order() {
        let app = Router::new().route(
            "/servers",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                assert_eq!(q.get("filters[country_id]").map(String::as_str), Some("209"));
                assert_eq!(q.get("limit").map(String::as_str), Some("10"));
                r#"[
                    {"name": "Switzerland #1", "hostname": "ch1.example.net", "station": "185.0.0.1"},
                    {"name": "Switzerland #2", "hostname": "ch2.example.net"},
                    {"name": "Broken", "hostname": ""},
                    {"name": "Switzerland #3", "hostname": "ch3.example.net", "station": null, "load": 12}
                ]"#
            }),
        );
        let addr = serve(app).await;

        let servers = source(format!("http://{}/servers", addr)).fetch().await.unwrap();

        let names: Vec<_> = servers.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["Switzerland #1", "Switzerland #2", "Switzerland #3"]);
        assert_eq!(servers[0].ip, "185.0.0.1");
        assert_eq!(servers[1].ip, "ch2.example.net");
        assert_eq!(servers[2].ip, "ch3.example.net");
    }

    #[tokio::test]
    async fn test_odd_entries_skipped_or_named_by_host() {
        let app = Router::new().route(
            "/servers",
            get(|| async {
                r#"[
                    {"name": "Switzerland #1", "hostname": "ch1.example.net"},
                    {"name": "Odd", "hostname": null},
                    {"name": "Hostless"},
                    {"hostname": "ch2.example.net"},
                    {"name": null, "hostname": "ch3.example.net", "station": "185.0.0.3"}
                ]"#
            }),
        );
        let addr = serve(app).await;

        let servers = source(format!("http://{}/servers", addr)).fetch().await.unwrap();

        let names: Vec<_> = servers.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["Switzerland #1", "ch2.example.net", "ch3.example.net"]);
        assert_eq!(servers[2].ip, "185.0.0.3");
    }

    #[tokio::test]
    async fn test_empty_list() {
        let addr = serve(Router::new().route("/servers", get(|| async { "[]" }))).await;
        let err = source(format!("http://{}/servers", addr)).fetch().await.unwrap_err();
        assert!(matches!(err, CandidateError::Empty));
    }

    #[tokio::test]
    async fn test_bad_json_and_status() {
        let app = Router::new()
            .route("/garbage", get(|| async { "<html>" }))
            .route("/down", get(|| async { StatusCode::SERVICE_UNAVAILABLE }));
        let addr = serve(app).await;

        let err = source(format!("http://{}/garbage", addr)).fetch().await.unwrap_err();
        assert!(matches!(err, CandidateError::Decode(_)));

        let err = source(format!("http://{}/down", addr)).fetch().await.unwrap_err();
        assert!(matches!(err, CandidateError::Status(503)));
    }

    #[test]
    fn test_request_url_encoding() {
        let url = source("https://api.example.com/v1/servers/recommendations".into())
            .request_url()
            .unwrap();
        assert_eq!(
            url,
            "https://api.example.com/v1/servers/recommendations?filters%5Bcountry_id%5D=209&limit=10"
        );
    }
}
