//! Operator notifications
//!
//! The chat channel itself lives outside this crate. The guard only
//! needs something it can hand a short, lightly marked-up message to.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tracing::info;

/// Something that can deliver a message to the operator
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send one message. Bodies use `<b>` and `<code>` inline markup.
    async fn send(&self, message: &str) -> Result<(), NotifyError>;
}

/// Notifier that only writes messages to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &str) -> Result<(), NotifyError> {
        info!(target: "tunnelguard::notify", "{}", message);
        Ok(())
    }
}

/// Notification errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum NotifyError {
    #[error("Notification channel unavailable: {0}")]
    Unavailable(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Messages the guard sends
#[derive(Debug, Clone, PartialEq)]
pub enum Notice<'a> {
    LeakDetected,
    IpCheckFailed { error: &'a str },
    IpChanged { old: &'a str, new: &'a str },
    RotationStarting,
    CandidatesUnavailable { error: &'a str },
    NoServerResponded,
    RotationWinner {
        name: &'a str,
        latency: Duration,
        throughput: f64,
    },
    RotationFinished { ip: Option<&'a str> },
}

impl fmt::Display for Notice<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::LeakDetected => write!(
                f,
                "🚨 <b>IP LEAK ALERT</b>\nVPN down, real IP detected. Torrents paused."
            ),
            Notice::IpCheckFailed { error } => {
                write!(f, "⚠️ <b>VPN Monitor</b>: IP check failed: {}", error)
            }
            Notice::IpChanged { old, new } => write!(
                f,
                "ℹ️ <b>VPN Monitor</b>: IP change detected\nOld: <code>{}</code>\nNew: <code>{}</code>",
                old, new
            ),
            Notice::RotationStarting => {
                write!(f, "🔍 <b>VPN Rotation</b>: starting server benchmark...")
            }
            Notice::CandidatesUnavailable { error } => write!(
                f,
                "❌ <b>VPN Rotation</b>: could not fetch servers: {}",
                error
            ),
            Notice::NoServerResponded => write!(
                f,
                "❌ <b>VPN Rotation</b>: no server responded to the benchmark."
            ),
            Notice::RotationWinner {
                name,
                latency,
                throughput,
            } => write!(
                f,
                "🚀 <b>VPN Rotation</b>: best server <b>{}</b>\nLatency: {} ms\nThroughput: {:.1} MB/s",
                name,
                latency.as_millis(),
                throughput / (1024.0 * 1024.0)
            ),
            Notice::RotationFinished { ip: Some(ip) } => write!(
                f,
                "✅ <b>VPN Rotation</b>: reconnected. IP: <code>{}</code>",
                ip
            ),
            Notice::RotationFinished { ip: None } => write!(
                f,
                "✅ <b>VPN Rotation</b>: reconnect issued. IP: <code>unknown</code>"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_winner_formatting() {
        let notice = Notice::RotationWinner {
            name: "Switzerland #12",
            latency: Duration::from_micros(23_900),
            throughput: 5.0 * 1024.0 * 1024.0,
        };
        let text = notice.to_string();

        assert!(text.contains("<b>Switzerland #12</b>"));
        assert!(text.contains("Latency: 23 ms"));
        assert!(text.contains("Throughput: 5.0 MB/s"));
    }

    #[test]
    fn test_ip_change_formatting() {
        let text = Notice::IpChanged { old: "1.1.1.1", new: "2.2.2.2" }.to_string();
        assert!(text.contains("<code>1.1.1.1</code>"));
        assert!(text.contains("<code>2.2.2.2</code>"));
    }

    #[tokio::test]
    async fn test_log_notifier_accepts_everything() {
        assert!(LogNotifier.send(&Notice::LeakDetected.to_string()).await.is_ok());
    }
}
