//! IP Resolver
//!
//! Asks an external "what is my IP" service for the public address the
//! tunnel currently exits from.

use crate::state::GuardState;
use crate::telemetry;
use std::sync::Arc;
use tracing::debug;
use tunnelguard_net::{HttpClient, HttpError};

/// Resolves the current public IP
#[derive(Clone)]
pub struct IpResolver {
    client: Arc<HttpClient>,
}

impl IpResolver {
    pub fn new(client: Arc<HttpClient>) -> Self {
        Self { client }
    }

    /// Fetch the public IP and store it in `state`.
    ///
    /// The body is taken as plain text with surrounding whitespace
    /// removed. On any error the stored IP is left unchanged. No retries.
    pub async fn resolve(&self, state: &GuardState) -> Result<String, ResolveError> {
        let url = state.ip_checker_url().await;
        let response = self.client.get(&url).await?;

        if !response.is_success() {
            return Err(ResolveError::Status(response.status.as_u16()));
        }

        let ip = response
            .text()
            .map_err(|_| ResolveError::InvalidBody)?
            .trim()
            .to_string();
        if ip.is_empty() {
            return Err(ResolveError::InvalidBody);
        }

        debug!(ip = %ip, "Resolved public IP");
        let previous = state.set_current_ip(ip.clone()).await;
        telemetry::record_public_ip(previous.as_deref(), &ip);
        Ok(ip)
    }
}

/// IP resolution errors
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Transport(#[from] HttpError),

    #[error("IP service returned HTTP {0}")]
    Status(u16),

    #[error("IP service returned an empty or non-text body")]
    InvalidBody,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{closed_addr, serve};
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;

    fn resolver() -> IpResolver {
        IpResolver::new(Arc::new(HttpClient::with_defaults().unwrap()))
    }

    #[tokio::test]
    async fn test_resolve_strips_padding() {
        for body in ["5.6.7.8", "  5.6.7.8\n", "\t5.6.7.8\r\n\r\n"] {
            let addr = serve(Router::new().route("/ip", get(move || async move { body }))).await;
            let state = GuardState::new("", format!("http://{}/ip", addr));

            let ip = resolver().resolve(&state).await.unwrap();
            assert_eq!(ip, "5.6.7.8");
            assert_eq!(state.current_ip().await.as_deref(), Some("5.6.7.8"));
        }
    }

    #[tokio::test]
    async fn test_non_success_leaves_state() {
        let addr = serve(Router::new().route(
            "/ip",
            get(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
        ))
        .await;
        let state = GuardState::new("", format!("http://{}/ip", addr));
        state.set_current_ip("9.9.9.9".into()).await;

        let err = resolver().resolve(&state).await.unwrap_err();
        assert!(matches!(err, ResolveError::Status(502)));
        assert_eq!(state.current_ip().await.as_deref(), Some("9.9.9.9"));
    }

    #[tokio::test]
    async fn test_blank_body_rejected() {
        let addr = serve(Router::new().route("/ip", get(|| async { " \n" }))).await;
        let state = GuardState::new("", format!("http://{}/ip", addr));

        let err = resolver().resolve(&state).await.unwrap_err();
        assert!(matches!(err, ResolveError::InvalidBody));
        assert!(state.current_ip().await.is_none());
    }

    #[tokio::test]
    async fn test_transport_error() {
        let addr = closed_addr().await;
        let state = GuardState::new("", format!("http://{}/ip", addr));

        let err = resolver().resolve(&state).await.unwrap_err();
        assert!(matches!(err, ResolveError::Transport(_)));
    }
}
