//! Reconnect Strategy
//!
//! Applies a newly selected exit server. Chosen once from configuration:
//!
//! - **Container restart**: `POST /<version>/containers/<name>/restart`
//!   on the container engine's Unix socket. The VPN container picks its
//!   own endpoint when it comes back up.
//! - **CLI**: runs `<program> connect <server-name>`.
//!
//! Both are best-effort. Callers log failures and carry on.

use crate::config::ReconnectConfig;
use std::time::Duration;
use tokio::process::Command;
use tracing::info;
use tunnelguard_net::{HttpError, UnixHttpClient};

/// Mechanism used to switch exit servers
#[derive(Debug, Clone)]
pub enum ReconnectStrategy {
    ContainerRestart {
        client: UnixHttpClient,
        container: String,
        api_version: String,
    },
    Cli {
        program: String,
        timeout: Duration,
    },
}

impl ReconnectStrategy {
    pub fn from_config(config: &ReconnectConfig) -> Self {
        match config {
            ReconnectConfig::Container {
                container,
                socket,
                api_version,
                timeout_secs,
            } => ReconnectStrategy::ContainerRestart {
                client: UnixHttpClient::new(socket.clone(), Duration::from_secs(*timeout_secs)),
                container: container.clone(),
                api_version: api_version.clone(),
            },
            ReconnectConfig::Cli {
                program,
                timeout_secs,
            } => ReconnectStrategy::Cli {
                program: program.clone(),
                timeout: Duration::from_secs(*timeout_secs),
            },
        }
    }

    /// Short human-readable form, for logs and status
    pub fn describe(&self) -> String {
        match self {
            ReconnectStrategy::ContainerRestart { container, .. } => {
                format!("container restart ({})", container)
            }
            ReconnectStrategy::Cli { program, .. } => format!("cli ({})", program),
        }
    }

    /// Switch to `server_name`
    pub async fn apply(&self, server_name: &str) -> Result<(), ReconnectError> {
        match self {
            ReconnectStrategy::ContainerRestart {
                client,
                container,
                api_version,
            } => {
                let path = restart_path(api_version, container);
                let (status, body) = client.post(&path).await?;
                if !status.is_success() {
                    return Err(ReconnectError::ContainerApi {
                        status: status.as_u16(),
                        message: String::from_utf8_lossy(&body).trim().to_string(),
                    });
                }
                info!(container = %container, "Restarted VPN container");
                Ok(())
            }
            ReconnectStrategy::Cli { program, timeout } => {
                let output = tokio::time::timeout(
                    *timeout,
                    connect_command(program, server_name).output(),
                )
                .await
                .map_err(|_| ReconnectError::Timeout(*timeout))?
                .map_err(|e| ReconnectError::Spawn(format!("{}: {}", program, e)))?;

                if !output.status.success() {
                    return Err(ReconnectError::CommandFailed {
                        code: output.status.code(),
                        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                    });
                }
                info!(server = %server_name, "VPN client connected");
                Ok(())
            }
        }
    }
}

fn restart_path(api_version: &str, container: &str) -> String {
    format!("/{}/containers/{}/restart", api_version.trim_matches('/'), container)
}

fn connect_command(program: &str, server_name: &str) -> Command {
    let mut command = Command::new(program);
    command.arg("connect").arg(server_name).kill_on_drop(true);
    command
}

/// Reconnect errors
#[derive(Debug, thiserror::Error)]
pub enum ReconnectError {
    #[error(transparent)]
    Transport(#[from] HttpError),

    #[error("Container API returned HTTP {status}: {message}")]
    ContainerApi { status: u16, message: String },

    #[error("Failed to start VPN client: {0}")]
    Spawn(String),

    #[error("VPN client timed out after {0:?}")]
    Timeout(Duration),

    #[error("VPN client exited with {code:?}: {stderr}")]
    CommandFailed { code: Option<i32>, stderr: String },
}
