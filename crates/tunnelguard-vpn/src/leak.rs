//! Leak Detector
//!
//! Decides whether the public IP seen from inside the tunnel is the
//! operator's real, non-tunneled IP.
//!
//! # Behavior
//!
//! - `real_ip` empty: detection disabled, every check is `Secure`
//! - observed IP equals `real_ip`: `Leaked`
//! - anything else: `Secure`
//!
//! The state is not latched. Each check stands on its own, so a later
//! check with a different IP is simply `Secure` again.

use crate::telemetry;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Outcome of one leak check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeakStatus {
    /// No match, or no baseline configured
    Secure,
    /// Observed IP is the real IP
    Leaked,
}

impl LeakStatus {
    /// Check if torrent traffic may keep flowing
    pub fn allows_traffic(&self) -> bool {
        matches!(self, LeakStatus::Secure)
    }

    pub fn is_leaked(&self) -> bool {
        matches!(self, LeakStatus::Leaked)
    }
}

/// Pure leak decision
pub fn evaluate(current_ip: &str, real_ip: &str) -> LeakStatus {
    if !real_ip.is_empty() && current_ip == real_ip {
        LeakStatus::Leaked
    } else {
        LeakStatus::Secure
    }
}

/// Leak detector bound to the configured baseline
#[derive(Debug)]
pub struct LeakDetector {
    /// Set once, never mutated
    real_ip: String,
    total_checked: AtomicU64,
    total_leaks: AtomicU64,
}

impl LeakDetector {
    /// Create a detector for `real_ip` (empty disables detection)
    pub fn new(real_ip: impl Into<String>) -> Self {
        Self {
            real_ip: real_ip.into().trim().to_string(),
            total_checked: AtomicU64::new(0),
            total_leaks: AtomicU64::new(0),
        }
    }

    /// Detector with no baseline
    pub fn disabled() -> Self {
        Self::new("")
    }

    pub fn is_enabled(&self) -> bool {
        !self.real_ip.is_empty()
    }

    pub fn real_ip(&self) -> &str {
        &self.real_ip
    }

    /// Check an observed IP
    pub fn check(&self, current_ip: &str) -> LeakStatus {
        self.total_checked.fetch_add(1, Ordering::Relaxed);

        let status = evaluate(current_ip, &self.real_ip);
        if status.is_leaked() {
            self.total_leaks.fetch_add(1, Ordering::Relaxed);
            warn!(ip = %current_ip, "IP leak detected: public IP equals real IP");
        }
        telemetry::record_check(status.is_leaked());
        status
    }

    pub fn total_checked(&self) -> u64 {
        self.total_checked.load(Ordering::Relaxed)
    }

    pub fn total_leaks(&self) -> u64 {
        self.total_leaks.load(Ordering::Relaxed)
    }
}
