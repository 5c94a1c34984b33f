//! Torrent Control Gateway
//!
//! Thin client for the torrent client's Web API: the pause/resume
//! killswitch and the forwarded listen port.

use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use tunnelguard_net::{HttpClient, HttpError};

/// Torrent client control API
pub struct TorrentGateway {
    client: Arc<HttpClient>,
    base_url: String,
    /// Last listen port successfully applied
    last_port: Mutex<Option<u16>>,
}

impl TorrentGateway {
    /// `base_url` is the API root, e.g. `http://gluetun:8080/api/v2`
    pub fn new(client: Arc<HttpClient>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            last_port: Mutex::new(None),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Pause every torrent
    pub async fn pause_all(&self) -> Result<(), GatewayError> {
        self.post("/torrents/pause", &[("hashes", "all")]).await?;
        info!("Paused all torrents");
        Ok(())
    }

    /// Resume every torrent
    pub async fn resume_all(&self) -> Result<(), GatewayError> {
        self.post("/torrents/resume", &[("hashes", "all")]).await?;
        info!("Resumed all torrents");
        Ok(())
    }

    /// Set the client's incoming listen port
    pub async fn set_listen_port(&self, port: u16) -> Result<(), GatewayError> {
        let prefs = format!("{{\"listen_port\":{}}}", port);
        self.post("/app/setPreferences", &[("json", prefs.as_str())]).await?;
        info!(port, "Updated torrent listen port");
        Ok(())
    }

    /// Apply the port the VPN client forwarded, if it changed.
    ///
    /// Returns the newly applied port, or `None` when there was nothing
    /// to do (file missing, empty, or unchanged). The port is only
    /// remembered once the API accepted it.
    pub async fn sync_forwarded_port(&self, port_file: &Path) -> Result<Option<u16>, GatewayError> {
        let content = match tokio::fs::read_to_string(port_file).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %port_file.display(), "No forwarded port file");
                return Ok(None);
            }
            Err(e) => return Err(GatewayError::PortFile(e.to_string())),
        };

        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let port: u16 = trimmed
            .parse()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| GatewayError::InvalidPort(trimmed.to_string()))?;

        let mut last = self.last_port.lock().await;
        if *last == Some(port) {
            return Ok(None);
        }

        self.set_listen_port(port).await?;
        *last = Some(port);
        Ok(Some(port))
    }

    async fn post(&self, path: &str, form: &[(&str, &str)]) -> Result<(), GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post_form(&url, form).await?;
        if !response.is_success() {
            return Err(GatewayError::Status(response.status.as_u16()));
        }
        Ok(())
    }
}

/// Torrent control errors
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Transport(#[from] HttpError),

    #[error("Torrent API returned HTTP {0}")]
    Status(u16),

    #[error("Cannot read forwarded port file: {0}")]
    PortFile(String),

    #[error("Invalid forwarded port: {0:?}")]
    InvalidPort(String),
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::testing::serve;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::{post, MethodRouter};
    use axum::{Form, Router};
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::Mutex as StdMutex;

    /// Fake torrent API recording `(path, form)` for each call
    #[derive(Clone, Default)]
    pub(crate) struct FakeTorrentApi {
        calls: Arc<StdMutex<Vec<(String, HashMap<String, String>)>>>,
    }

    impl FakeTorrentApi {
        pub(crate) async fn start(&self) -> SocketAddr {
            self.start_with_status(StatusCode::OK).await
        }

        pub(crate) async fn start_with_status(&self, status: StatusCode) -> SocketAddr {
            async fn record(
                State((api, status, path)): State<(FakeTorrentApi, StatusCode, &'static str)>,
                Form(form): Form<HashMap<String, String>>,
            ) -> StatusCode {
                api.calls.lock().unwrap().push((path.to_string(), form));
                status
            }

            let route = |path: &'static str| -> MethodRouter {
                post(record).with_state((self.clone(), status, path))
            };
            let app = Router::new()
                .route("/api/v2/torrents/pause", route("pause"))
                .route("/api/v2/torrents/resume", route("resume"))
                .route("/api/v2/app/setPreferences", route("setPreferences"));
            serve(app).await
        }

        pub(crate) fn count(&self, path: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|(p, _)| p == path).count()
        }

        pub(crate) fn calls(&self) -> Vec<(String, HashMap<String, String>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    pub(crate) fn base_url(addr: SocketAddr) -> String {
        format!("http://{}/api/v2", addr)
    }

    fn gateway(addr: SocketAddr) -> TorrentGateway {
        TorrentGateway::new(Arc::new(HttpClient::with_defaults().unwrap()), base_url(addr))
    }

    #[tokio::test]
    async fn test_pause_and_resume_send_all_hashes() {
        let api = FakeTorrentApi::default();
        let gateway = gateway(api.start().await);

        gateway.pause_all().await.unwrap();
        gateway.resume_all().await.unwrap();

        let calls = api.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "pause");
        assert_eq!(calls[1].0, "resume");
        for (_, form) in calls {
            assert_eq!(form.get("hashes").map(String::as_str), Some("all"));
        }
    }

    #[tokio::test]
    async fn test_rejected_call_is_status_error() {
        let api = FakeTorrentApi::default();
        let gateway = gateway(api.start_with_status(StatusCode::FORBIDDEN).await);

        let err = gateway.pause_all().await.unwrap_err();
        assert!(matches!(err, GatewayError::Status(403)));
    }

    #[tokio::test]
    async fn test_trailing_slash_in_base_url() {
        let gateway = TorrentGateway::new(
            Arc::new(HttpClient::with_defaults().unwrap()),
            "http://127.0.0.1:8080/api/v2/",
        );
        assert_eq!(gateway.base_url(), "http://127.0.0.1:8080/api/v2");
    }

    #[tokio::test]
    async fn test_port_sync_applies_changes_once() {
        let api = FakeTorrentApi::default();
        let gateway = gateway(api.start().await);
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("forwarded_port");

        // Missing file is not an error
        assert_eq!(gateway.sync_forwarded_port(&file).await.unwrap(), None);

        std::fs::write(&file, "51413\n").unwrap();
        assert_eq!(gateway.sync_forwarded_port(&file).await.unwrap(), Some(51413));
        assert_eq!(gateway.sync_forwarded_port(&file).await.unwrap(), None);

        std::fs::write(&file, "40000").unwrap();
        assert_eq!(gateway.sync_forwarded_port(&file).await.unwrap(), Some(40000));

        let calls = api.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0].1.get("json").map(String::as_str),
            Some("{\"listen_port\":51413}")
        );
    }

    #[tokio::test]
    async fn test_port_sync_retries_after_failure() {
        let api = FakeTorrentApi::default();
        let gateway = gateway(api.start_with_status(StatusCode::INTERNAL_SERVER_ERROR).await);
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("forwarded_port");
        std::fs::write(&file, "51413").unwrap();

        assert!(gateway.sync_forwarded_port(&file).await.is_err());
        assert!(gateway.sync_forwarded_port(&file).await.is_err());
        assert_eq!(api.count("setPreferences"), 2);
    }

    #[tokio::test]
    async fn test_port_sync_rejects_garbage() {
        let api = FakeTorrentApi::default();
        let gateway = gateway(api.start().await);
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("forwarded_port");

        std::fs::write(&file, "  \n").unwrap();
        assert_eq!(gateway.sync_forwarded_port(&file).await.unwrap(), None);

        std::fs::write(&file, "not-a-port").unwrap();
        let err = gateway.sync_forwarded_port(&file).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidPort(_)));
        assert_eq!(api.count("setPreferences"), 0);
    }
}
