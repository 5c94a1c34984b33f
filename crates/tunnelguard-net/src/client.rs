//! HTTP Client
//!
//! Uses hyper's low-level HTTP/1.1 connection API with tokio.
//! Features:
//! - Automatic HTTPS with rustls
//! - Optional HTTP forward proxy (absolute-form or `CONNECT`)
//! - Per-call timeouts and a capped response body
//! - Streaming responses for throughput measurement

use crate::proxy::ProxyTarget;
use crate::HttpError;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderMap, HeaderValue, CONTENT_TYPE, HOST, USER_AGENT};
use hyper::{Method, Request, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use rustls::ClientConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Whole-request timeout (connect, headers and buffered body)
    pub timeout: Duration,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// User-Agent string
    pub user_agent: String,
    /// Maximum buffered response body size
    pub max_body_size: usize,
    /// HTTP forward proxy, e.g. `http://gluetun:8888`
    pub proxy: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            user_agent: "tunnelguard/0.1".to_string(),
            max_body_size: 1024 * 1024, // 1 MB
            proxy: None,
        }
    }
}

/// Buffered HTTP response
#[derive(Debug)]
pub struct Response {
    /// Status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: Vec<u8>,
}

impl Response {
    /// Check if response was successful (2xx)
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Get body as string
    pub fn text(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.body)
    }
}

/// Response whose body has not been read yet
#[derive(Debug)]
pub struct StreamingResponse {
    /// Status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    body: Incoming,
}

impl StreamingResponse {
    /// Read the body to the end, discarding it, and return the byte count.
    pub async fn drain(self) -> Result<u64, HttpError> {
        let mut body = self.body;
        let mut received = 0u64;

        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(|e| HttpError::Body(e.to_string()))?;
            if let Some(chunk) = frame.data_ref() {
                received += chunk.len() as u64;
            }
        }

        Ok(received)
    }
}

/// Client statistics
#[derive(Debug, Default)]
pub struct ClientStats {
    pub requests_made: AtomicU64,
    pub requests_failed: AtomicU64,
    pub bytes_downloaded: AtomicU64,
}

/// Request destination extracted from a URL
struct Target {
    host: String,
    port: u16,
    https: bool,
}

impl Target {
    fn from_uri(uri: &Uri) -> Result<Self, HttpError> {
        let https = match uri.scheme_str() {
            Some("https") => true,
            Some("http") => false,
            Some(other) => return Err(HttpError::InvalidUrl(format!("Unsupported scheme: {}", other))),
            None => return Err(HttpError::InvalidUrl("No scheme in URL".to_string())),
        };

        let host = uri
            .host()
            .ok_or_else(|| HttpError::InvalidUrl("No host in URL".to_string()))?
            .to_string();
        let port = uri.port_u16().unwrap_or(if https { 443 } else { 80 });

        Ok(Self { host, port, https })
    }

    fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn host_header(&self) -> String {
        let default_port = if self.https { 443 } else { 80 };
        if self.port == default_port {
            self.host.clone()
        } else {
            self.authority()
        }
    }
}

/// HTTP client for the guard's outbound calls
pub struct HttpClient {
    /// Configuration
    config: HttpClientConfig,
    /// Shared TLS connector
    tls: TlsConnector,
    /// Parsed forward proxy
    proxy: Option<ProxyTarget>,
    /// Statistics
    stats: ClientStats,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(config: HttpClientConfig) -> Result<Self, HttpError> {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let tls_config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let proxy = config
            .proxy
            .as_deref()
            .map(ProxyTarget::parse)
            .transpose()?;

        info!(
            "HTTP client initialized (timeout: {:?}, proxy: {})",
            config.timeout,
            proxy.as_ref().map(|p| p.authority()).unwrap_or_else(|| "none".to_string())
        );

        Ok(Self {
            config,
            tls: TlsConnector::from(Arc::new(tls_config)),
            proxy,
            stats: ClientStats::default(),
        })
    }

    /// Create with default configuration
    pub fn with_defaults() -> Result<Self, HttpError> {
        Self::new(HttpClientConfig::default())
    }

    /// Perform a GET request
    pub async fn get(&self, url: &str) -> Result<Response, HttpError> {
        self.send(Method::GET, url, HeaderMap::new(), Bytes::new()).await
    }

    /// POST an `application/x-www-form-urlencoded` body
    pub async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<Response, HttpError> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(form.iter())
            .finish();

        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );

        self.send(Method::POST, url, headers, Bytes::from(body)).await
    }

    /// Perform a request and buffer the response body
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<Response, HttpError> {
        let start = Instant::now();
        let max_body_size = self.config.max_body_size;

        let result = tokio::time::timeout(self.config.timeout, async {
            let response = self.dispatch(method.clone(), url, headers, body).await?;
            let status = response.status();
            let headers = response.headers().clone();

            let collected = Limited::new(response.into_body(), max_body_size)
                .collect()
                .await
                .map_err(|e| {
                    if e.is::<LengthLimitError>() {
                        HttpError::BodyTooLarge(max_body_size)
                    } else {
                        HttpError::Body(e.to_string())
                    }
                })?;

            Ok::<_, HttpError>((status, headers, collected.to_bytes().to_vec()))
        })
        .await
        .map_err(|_| HttpError::Timeout)
        .and_then(|r| r);

        let (status, headers, body) = self.record(result)?;
        self.stats.bytes_downloaded.fetch_add(body.len() as u64, Ordering::Relaxed);

        debug!(
            "HTTP {} {} -> {} ({} bytes, {:?})",
            method, url, status, body.len(), start.elapsed()
        );

        Ok(Response {
            status,
            headers,
            body,
        })
    }

    /// Perform a request and return as soon as the response head arrives.
    ///
    /// Only the connect and header phase is bounded by the client timeout;
    /// the caller owns the deadline for reading the body.
    pub async fn stream(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
    ) -> Result<StreamingResponse, HttpError> {
        let result = tokio::time::timeout(
            self.config.timeout,
            self.dispatch(method, url, headers, Bytes::new()),
        )
        .await
        .map_err(|_| HttpError::Timeout)
        .and_then(|r| r);

        let response = self.record(result)?;
        let (parts, body) = response.into_parts();

        Ok(StreamingResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }

    /// Get client statistics: (requests made, requests failed, bytes downloaded)
    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.stats.requests_made.load(Ordering::Relaxed),
            self.stats.requests_failed.load(Ordering::Relaxed),
            self.stats.bytes_downloaded.load(Ordering::Relaxed),
        )
    }

    fn record<T>(&self, result: Result<T, HttpError>) -> Result<T, HttpError> {
        self.stats.requests_made.fetch_add(1, Ordering::Relaxed);
        if result.is_err() {
            self.stats.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    async fn dispatch(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<hyper::Response<Incoming>, HttpError> {
        let uri: Uri = url
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| HttpError::InvalidUrl(e.to_string()))?;
        let target = Target::from_uri(&uri)?;

        // Plain HTTP through a proxy is sent in absolute-form; everything
        // else reaches the origin (or a CONNECT tunnel) in origin-form.
        let absolute_form = self.proxy.is_some() && !target.https;
        let request_target = if absolute_form {
            uri.to_string()
        } else {
            uri.path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| "/".to_string())
        };

        let mut request = Request::builder()
            .method(method)
            .uri(request_target)
            .header(HOST, target.host_header())
            .header(USER_AGENT, &self.config.user_agent)
            .body(Full::new(body))
            .map_err(|e| HttpError::Http(e.to_string()))?;
        request.headers_mut().extend(headers);

        let connect_timeout = self.config.connect_timeout;
        let stream = match &self.proxy {
            Some(proxy) if target.https => proxy.tunnel(&target.authority(), connect_timeout).await?,
            Some(proxy) => proxy.connect(connect_timeout).await?,
            None => connect_tcp(&target.authority(), connect_timeout).await?,
        };

        if target.https {
            let server_name = rustls::pki_types::ServerName::try_from(target.host.clone())
                .map_err(|_| HttpError::Tls("Invalid server name".to_string()))?;
            let tls_stream = self
                .tls
                .connect(server_name, stream)
                .await
                .map_err(|e| HttpError::Tls(e.to_string()))?;
            send_over(tls_stream, request).await
        } else {
            send_over(stream, request).await
        }
    }
}

/// Open a TCP connection bounded by `timeout`
pub(crate) async fn connect_tcp(addr: &str, timeout: Duration) -> Result<TcpStream, HttpError> {
    tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| HttpError::Timeout)?
        .map_err(|e| HttpError::ConnectionFailed(format!("{}: {}", addr, e)))
}

/// Run one HTTP/1.1 exchange over an established stream
pub(crate) async fn send_over<T>(
    io: T,
    request: Request<Full<Bytes>>,
) -> Result<hyper::Response<Incoming>, HttpError>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io))
        .await
        .map_err(|e| HttpError::Http(e.to_string()))?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("Connection error: {}", e);
        }
    });

    sender
        .send_request(request)
        .await
        .map_err(|e| HttpError::Http(e.to_string()))
}
