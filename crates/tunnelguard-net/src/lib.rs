//! tunnelguard network layer
//!
//! Minimal HTTP/1.1 plumbing for the privacy guard.
//!
//! Architecture:
//! 1. URL parsed and checked before any socket is opened
//! 2. TCP (optionally through an HTTP forward proxy) or Unix socket
//! 3. rustls for `https://` targets
//! 4. Response either buffered with a size cap, or streamed and drained

mod client;
mod proxy;
mod unix;

pub use client::{ClientStats, HttpClient, HttpClientConfig, Response, StreamingResponse};
pub use hyper::{Method, StatusCode};
pub use hyper::header::{self, HeaderMap, HeaderValue};
pub use unix::UnixHttpClient;

/// HTTP client errors
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Proxy error: {0}")]
    Proxy(String),

    #[error("Request timeout")]
    Timeout,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Body read error: {0}")]
    Body(String),

    #[error("Response body exceeds {0} bytes")]
    BodyTooLarge(usize),
}
