//! HTTP over a Unix domain socket
//!
//! Used for local management APIs (e.g. the container engine socket),
//! where the URL host is irrelevant and only the path is sent.

use crate::client::send_over;
use crate::HttpError;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{HOST, USER_AGENT};
use hyper::{Method, Request, StatusCode};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::UnixStream;
use tracing::debug;

/// Minimal HTTP/1.1 client bound to one Unix socket
#[derive(Debug, Clone)]
pub struct UnixHttpClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl UnixHttpClient {
    /// Create a client for `socket_path`
    pub fn new(socket_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout,
        }
    }

    /// POST with an empty body; returns the status and the response body
    pub async fn post(&self, path: &str) -> Result<(StatusCode, Vec<u8>), HttpError> {
        self.request(Method::POST, path).await
    }

    /// Send a bodiless request to `path` (origin-form, e.g. `/v1.41/_ping`)
    pub async fn request(&self, method: Method, path: &str) -> Result<(StatusCode, Vec<u8>), HttpError> {
        tokio::time::timeout(self.timeout, async {
            let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
                HttpError::ConnectionFailed(format!("{}: {}", self.socket_path.display(), e))
            })?;

            let request = Request::builder()
                .method(method.clone())
                .uri(path)
                .header(HOST, "localhost")
                .header(USER_AGENT, "tunnelguard/0.1")
                .body(Full::new(Bytes::new()))
                .map_err(|e| HttpError::Http(e.to_string()))?;

            let response = send_over(stream, request).await?;
            let status = response.status();
            let body = response
                .into_body()
                .collect()
                .await
                .map_err(|e| HttpError::Body(e.to_string()))?
                .to_bytes()
                .to_vec();

            debug!("UNIX {} {} -> {}", method, path, status);
            Ok::<_, HttpError>((status, body))
        })
        .await
        .map_err(|_| HttpError::Timeout)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn test_post_over_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("engine.sock");
        let listener = UnixListener::bind(&socket).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = stream.read(&mut buf).await.unwrap();
            stream
                .write_all(b"HTTP/1.1 204 No Content\r\n\r\n")
                .await
                .unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        let client = UnixHttpClient::new(&socket, Duration::from_secs(2));
        let (status, body) = client.post("/v1.41/containers/vpn/restart").await.unwrap();

        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(body.is_empty());

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /v1.41/containers/vpn/restart HTTP/1.1\r\n"));
    }

    #[tokio::test]
    async fn test_missing_socket() {
        let dir = tempfile::tempdir().unwrap();
        let client = UnixHttpClient::new(dir.path().join("absent.sock"), Duration::from_secs(1));

        let result = client.post("/anything").await;
        assert!(matches!(result, Err(HttpError::ConnectionFailed(_))));
    }
}
