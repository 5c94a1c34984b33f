//! Network Privacy Guard
//!
//! Owns every component and the shared state, and runs the two cycles
//! the scheduler drives:
//!
//! - **Health check**: resolve IP, report changes, pause torrents on leak
//! - **Rotation**: see [`crate::rotation`]

use crate::benchmark::BenchmarkEngine;
use crate::candidate::CandidateSource;
use crate::config::{ConfigError, GuardConfig, RotationConfig};
use crate::leak::LeakStatus;
use crate::notifier::{Notice, Notifier};
use crate::reconnect::ReconnectStrategy;
use crate::resolver::{IpResolver, ResolveError};
use crate::state::GuardState;
use crate::torrent::{GatewayError, TorrentGateway};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tunnelguard_net::{HttpClient, HttpClientConfig, HttpError};

/// The privacy guard
pub struct Guard {
    pub(crate) state: GuardState,
    pub(crate) resolver: IpResolver,
    pub(crate) gateway: TorrentGateway,
    pub(crate) candidates: CandidateSource,
    pub(crate) engine: BenchmarkEngine,
    pub(crate) reconnect: ReconnectStrategy,
    pub(crate) rotation: RotationConfig,
    /// Forwarded-port file, when port sync is enabled
    port_file: Option<PathBuf>,
    /// Set for the whole of a rotation by its `RotationClaim`
    pub(crate) rotating: Arc<AtomicBool>,
}

/// Snapshot for status queries
#[derive(Debug, Clone, Serialize)]
pub struct GuardStatus {
    pub current_ip: Option<String>,
    pub leak_detection: bool,
    pub rotation_in_progress: bool,
    pub next_rotation: Option<DateTime<Local>>,
    pub reconnect: String,
    pub checks: u64,
    pub leaks: u64,
}

impl Guard {
    /// Build the guard and its components. The notifier is attached
    /// separately with [`Guard::set_notifier`].
    pub fn from_config(config: &GuardConfig) -> Result<Self, GuardError> {
        config.validate()?;

        let client = Arc::new(HttpClient::new(HttpClientConfig {
            timeout: Duration::from_secs(config.request_timeout_secs),
            proxy: config.http_proxy.clone(),
            ..HttpClientConfig::default()
        })?);

        let reconnect = ReconnectStrategy::from_config(&config.reconnect);
        info!(
            reconnect = %reconnect.describe(),
            leak_detection = !config.real_ip.is_empty(),
            "Privacy guard configured"
        );

        Ok(Self {
            state: GuardState::new(config.real_ip.clone(), config.ip_checker_url.clone()),
            resolver: IpResolver::new(client.clone()),
            gateway: TorrentGateway::new(client.clone(), config.torrent_api_url.clone()),
            candidates: CandidateSource::new(client.clone(), config.directory.clone()),
            engine: BenchmarkEngine::new(client, config.benchmark.clone()),
            reconnect,
            rotation: config.rotation.clone(),
            port_file: config.port_sync.as_ref().map(|s| s.port_file.clone()),
            rotating: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn state(&self) -> &GuardState {
        &self.state
    }

    pub async fn set_notifier(&self, notifier: Arc<dyn Notifier>) {
        self.state.set_notifier(notifier).await;
    }

    pub async fn current_ip(&self) -> Option<String> {
        self.state.current_ip().await
    }

    /// Check if a rotation is running right now
    pub fn is_rotating(&self) -> bool {
        self.rotating.load(Ordering::Acquire)
    }

    /// One health-check cycle.
    ///
    /// Resolution comes first, then the change notice, then the leak
    /// check. On a leak torrents are paused before the operator is told.
    pub async fn health_check(&self) -> Result<LeakStatus, ResolveError> {
        let previous = self.state.current_ip().await;

        let ip = match self.resolver.resolve(&self.state).await {
            Ok(ip) => ip,
            Err(e) => {
                error!(error = %e, "IP check failed");
                let message = e.to_string();
                self.state.notify(Notice::IpCheckFailed { error: &message }).await;
                return Err(e);
            }
        };

        if let Some(old) = previous.as_deref().filter(|old| *old != ip) {
            info!(old = %old, new = %ip, "Public IP changed");
            self.state.notify(Notice::IpChanged { old, new: &ip }).await;
        }

        let status = self.state.leak_detector().check(&ip);
        if status.is_leaked() {
            if let Err(e) = self.gateway.pause_all().await {
                error!(error = %e, "Failed to pause torrents after leak");
            }
            self.state.notify(Notice::LeakDetected).await;
        }

        Ok(status)
    }

    /// Apply the VPN client's forwarded port to the torrent client
    pub async fn sync_forwarded_port(&self) -> Result<Option<u16>, GatewayError> {
        match &self.port_file {
            Some(path) => self.gateway.sync_forwarded_port(path).await,
            None => Ok(None),
        }
    }

    pub async fn status(&self) -> GuardStatus {
        let detector = self.state.leak_detector();
        GuardStatus {
            current_ip: self.state.current_ip().await,
            leak_detection: detector.is_enabled(),
            rotation_in_progress: self.is_rotating(),
            next_rotation: self.state.next_rotation().await,
            reconnect: self.reconnect.describe(),
            checks: detector.total_checked(),
            leaks: detector.total_leaks(),
        }
    }
}

/// Guard construction errors
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Http(#[from] HttpError),
}
