//! Guard State
//!
//! Process-wide state, created once at startup. Mutable fields share a
//! single reader/writer lock; the real IP baseline is fixed at
//! construction.

use crate::leak::LeakDetector;
use crate::notifier::{Notice, Notifier};
use chrono::{DateTime, Local};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error};

/// Lock-protected part of the state
struct Shared {
    /// Last resolved public IP
    current_ip: Option<String>,
    /// Overridable IP checker endpoint
    ip_checker_url: String,
    /// Attached after construction
    notifier: Option<Arc<dyn Notifier>>,
    /// Next scheduled rotation, for status reporting
    next_rotation: Option<DateTime<Local>>,
}

/// Shared guard state
pub struct GuardState {
    leak_detector: LeakDetector,
    shared: RwLock<Shared>,
}

impl GuardState {
    /// Create state with the real IP baseline and IP checker endpoint
    pub fn new(real_ip: impl Into<String>, ip_checker_url: impl Into<String>) -> Self {
        Self {
            leak_detector: LeakDetector::new(real_ip),
            shared: RwLock::new(Shared {
                current_ip: None,
                ip_checker_url: ip_checker_url.into(),
                notifier: None,
                next_rotation: None,
            }),
        }
    }

    pub fn leak_detector(&self) -> &LeakDetector {
        &self.leak_detector
    }

    /// Last resolved public IP
    pub async fn current_ip(&self) -> Option<String> {
        self.shared.read().await.current_ip.clone()
    }

    /// Store a freshly resolved IP, returning the previous one
    pub(crate) async fn set_current_ip(&self, ip: String) -> Option<String> {
        self.shared.write().await.current_ip.replace(ip)
    }

    pub async fn ip_checker_url(&self) -> String {
        self.shared.read().await.ip_checker_url.clone()
    }

    /// Point the resolver at a different IP service
    pub async fn set_ip_checker_url(&self, url: impl Into<String>) {
        self.shared.write().await.ip_checker_url = url.into();
    }

    /// Attach (or replace) the operator notifier
    pub async fn set_notifier(&self, notifier: Arc<dyn Notifier>) {
        self.shared.write().await.notifier = Some(notifier);
    }

    pub async fn next_rotation(&self) -> Option<DateTime<Local>> {
        self.shared.read().await.next_rotation
    }

    pub(crate) async fn set_next_rotation(&self, at: DateTime<Local>) {
        self.shared.write().await.next_rotation = Some(at);
    }

    /// Send a notice to the operator. Delivery failures are only logged.
    pub async fn notify(&self, notice: Notice<'_>) {
        // Clone the handle so the lock is not held across the send.
        let notifier = self.shared.read().await.notifier.clone();
        let message = notice.to_string();

        match notifier {
            Some(notifier) => {
                if let Err(e) = notifier.send(&message).await {
                    error!(error = %e, "Failed to notify operator");
                }
            }
            None => debug!("No notifier attached, dropping message: {}", message),
        }
    }
}
