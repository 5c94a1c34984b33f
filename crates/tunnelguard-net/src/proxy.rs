//! HTTP forward proxy support
//!
//! Plain `http://` requests are written to the proxy in absolute-form.
//! `https://` requests first open a `CONNECT` tunnel, then run TLS
//! end-to-end with the origin through it.

use crate::client::connect_tcp;
use crate::HttpError;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Upper bound on the proxy's CONNECT response head
const MAX_CONNECT_RESPONSE: usize = 8 * 1024;

/// A parsed `http://host:port` proxy address
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProxyTarget {
    host: String,
    port: u16,
}

impl ProxyTarget {
    /// Parse a proxy URL. Only `http://` proxies are supported.
    pub(crate) fn parse(raw: &str) -> Result<Self, HttpError> {
        let url = url::Url::parse(raw).map_err(|e| HttpError::InvalidUrl(format!("{}: {}", raw, e)))?;

        if url.scheme() != "http" {
            return Err(HttpError::InvalidUrl(format!(
                "Unsupported proxy scheme: {}",
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .ok_or_else(|| HttpError::InvalidUrl(format!("No host in proxy URL: {}", raw)))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(80);

        Ok(Self { host, port })
    }

    pub(crate) fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connect to the proxy itself
    pub(crate) async fn connect(&self, timeout: Duration) -> Result<TcpStream, HttpError> {
        connect_tcp(&self.authority(), timeout)
            .await
            .map_err(|e| HttpError::Proxy(e.to_string()))
    }

    /// Open a `CONNECT` tunnel to `target` (`host:port`)
    pub(crate) async fn tunnel(&self, target: &str, timeout: Duration) -> Result<TcpStream, HttpError> {
        let mut stream = self.connect(timeout).await?;

        tokio::time::timeout(timeout, async {
            let request = format!("CONNECT {0} HTTP/1.1\r\nHost: {0}\r\n\r\n", target);
            stream
                .write_all(request.as_bytes())
                .await
                .map_err(|e| HttpError::Proxy(e.to_string()))?;

            let head = read_response_head(&mut stream).await?;
            let status = parse_status(&head)?;
            if status != 200 {
                return Err(HttpError::Proxy(format!(
                    "CONNECT {} refused with status {}",
                    target, status
                )));
            }

            debug!("CONNECT tunnel to {} via {}", target, self.authority());
            Ok::<_, HttpError>(())
        })
        .await
        .map_err(|_| HttpError::Timeout)??;

        Ok(stream)
    }
}

/// Read byte by byte up to the blank line so no tunnelled data is consumed.
async fn read_response_head(stream: &mut TcpStream) -> Result<Vec<u8>, HttpError> {
    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];

    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_CONNECT_RESPONSE {
            return Err(HttpError::Proxy("CONNECT response too large".to_string()));
        }
        let n = stream
            .read(&mut byte)
            .await
            .map_err(|e| HttpError::Proxy(e.to_string()))?;
        if n == 0 {
            return Err(HttpError::Proxy("Proxy closed connection".to_string()));
        }
        head.push(byte[0]);
    }

    Ok(head)
}

fn parse_status(head: &[u8]) -> Result<u16, HttpError> {
    let text = String::from_utf8_lossy(head);
    let status_line = text.lines().next().unwrap_or_default();

    status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| HttpError::Proxy(format!("Malformed proxy response: {}", status_line)))
}
