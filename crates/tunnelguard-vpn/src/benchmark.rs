//! Benchmark Engine
//!
//! Measures candidate exit servers so they can be compared:
//!
//! 1. **Latency**: time to open a TCP connection to `hostname:443`
//! 2. **Throughput**: time to drain a ranged GET of a large mirror file
//! 3. **Score**: `throughput / max(latency_ms, 1)`
//!
//! A batch probes every candidate concurrently under one shared
//! deadline. Failed or late probes are dropped; the batch only fails
//! when nothing succeeded.

use crate::candidate::CandidateServer;
use crate::config::BenchmarkConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use tunnelguard_net::{header, HeaderMap, HeaderValue, HttpClient, HttpError, Method, StatusCode};

/// A candidate with a successful measurement
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkedServer {
    pub server: CandidateServer,
    /// TCP connect time
    pub latency: Duration,
    /// Bytes per second
    pub throughput: f64,
    pub score: f64,
}

impl BenchmarkedServer {
    pub fn new(server: CandidateServer, latency: Duration, throughput: f64) -> Self {
        Self {
            server,
            latency,
            throughput,
            score: score(throughput, latency),
        }
    }
}

/// Ranking value. Latency is floored at 1 ms.
pub fn score(throughput: f64, latency: Duration) -> f64 {
    let latency_ms = latency.as_secs_f64() * 1000.0;
    throughput / latency_ms.max(1.0)
}

/// Runs latency and throughput probes
#[derive(Clone)]
pub struct BenchmarkEngine {
    client: Arc<HttpClient>,
    config: BenchmarkConfig,
}

impl BenchmarkEngine {
    pub fn new(client: Arc<HttpClient>, config: BenchmarkConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    /// Measure one server
    pub async fn benchmark(&self, server: &CandidateServer) -> Result<BenchmarkedServer, ProbeError> {
        let latency = self.probe_latency(&server.hostname).await?;
        let throughput = self.probe_throughput().await?;

        debug!(
            server = %server.name,
            latency_ms = latency.as_millis() as u64,
            throughput,
            "Probe succeeded"
        );

        Ok(BenchmarkedServer::new(server.clone(), latency, throughput))
    }

    /// Time a TCP connect to `hostname:<probe_port>`
    pub async fn probe_latency(&self, hostname: &str) -> Result<Duration, ProbeError> {
        let start = Instant::now();
        tokio::time::timeout(
            self.config.dial_timeout(),
            TcpStream::connect((hostname, self.config.probe_port)),
        )
        .await
        .map_err(|_| ProbeError::DialTimeout)?
        .map_err(|e| ProbeError::Dial(e.to_string()))?;

        Ok(start.elapsed())
    }

    /// Download the configured byte range and return bytes per second
    pub async fn probe_throughput(&self) -> Result<f64, ProbeError> {
        let mut headers = HeaderMap::new();
        let range = format!("bytes=0-{}", self.config.range_end);
        headers.insert(
            header::RANGE,
            HeaderValue::from_str(&range).map_err(|e| HttpError::Http(e.to_string()))?,
        );

        let start = Instant::now();
        let response = self
            .client
            .stream(Method::GET, &self.config.mirror_url, headers)
            .await?;

        if response.status != StatusCode::OK && response.status != StatusCode::PARTIAL_CONTENT {
            return Err(ProbeError::UnexpectedStatus(response.status.as_u16()));
        }

        let bytes = response.drain().await?;
        if bytes == 0 {
            return Err(ProbeError::EmptyTransfer);
        }

        let elapsed = start.elapsed().as_secs_f64().max(f64::EPSILON);
        Ok(bytes as f64 / elapsed)
    }

    /// Probe all candidates concurrently.
    ///
    /// Successes come back in input order. Probes still running at the
    /// batch deadline are abandoned.
    pub async fn benchmark_all(
        &self,
        servers: Vec<CandidateServer>,
    ) -> Result<Vec<BenchmarkedServer>, BenchmarkError> {
        let total = servers.len();
        let deadline = tokio::time::Instant::now() + self.config.batch_timeout();
        let mut probes = JoinSet::new();

        for (index, server) in servers.into_iter().enumerate() {
            let engine = self.clone();
            probes.spawn(async move {
                let result = tokio::time::timeout_at(deadline, engine.benchmark(&server))
                    .await
                    .unwrap_or(Err(ProbeError::DeadlineExceeded));
                (index, server, result)
            });
        }

        let mut results = Vec::with_capacity(total);
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((index, _, Ok(measured))) => results.push((index, measured)),
                Ok((_, server, Err(e))) => {
                    warn!(server = %server.name, error = %e, "Dropping server from benchmark");
                }
                Err(e) => warn!(error = %e, "Benchmark task failed"),
            }
        }

        results.sort_by_key(|(index, _)| *index);
        info!(succeeded = results.len(), total, "Benchmark batch finished");

        if results.is_empty() {
            return Err(BenchmarkError::NoCandidatesResponded);
        }
        Ok(results.into_iter().map(|(_, measured)| measured).collect())
    }
}

/// Per-candidate probe failure
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("Dial timed out")]
    DialTimeout,

    #[error("Dial failed: {0}")]
    Dial(String),

    #[error(transparent)]
    Transport(#[from] HttpError),

    #[error("Mirror returned HTTP {0}")]
    UnexpectedStatus(u16),

    #[error("Mirror returned no data")]
    EmptyTransfer,

    #[error("Batch deadline exceeded")]
    DeadlineExceeded,
}

/// Batch failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BenchmarkError {
    #[error("No candidate server responded")]
    NoCandidatesResponded,
}
