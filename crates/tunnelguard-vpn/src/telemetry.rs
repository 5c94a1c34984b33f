//! Guard metrics
//!
//! Recorded through the `metrics` facade. Nothing is exported until the
//! binary installs a recorder; without one every call is a no-op.

use metrics::{counter, describe_counter, describe_gauge, gauge};

pub const PUBLIC_IP_INFO: &str = "vpn_public_ip_info";
pub const LEAK_CHECKS_TOTAL: &str = "vpn_leak_checks_total";
pub const LEAKS_TOTAL: &str = "vpn_leaks_total";
pub const ROTATION_IN_PROGRESS: &str = "vpn_rotation_in_progress";

/// Describe every guard metric and register the unlabelled ones at zero.
///
/// Call once, after the recorder is installed.
pub fn describe_metrics() {
    describe_gauge!(PUBLIC_IP_INFO, "Current public IP address");
    describe_counter!(LEAK_CHECKS_TOTAL, "Leak checks performed");
    describe_counter!(LEAKS_TOTAL, "Leaks detected");
    describe_gauge!(ROTATION_IN_PROGRESS, "Whether a rotation is running");

    counter!(LEAK_CHECKS_TOTAL).increment(0);
    counter!(LEAKS_TOTAL).increment(0);
    gauge!(ROTATION_IN_PROGRESS).set(0.0);
}

pub(crate) fn record_check(leaked: bool) {
    counter!(LEAK_CHECKS_TOTAL).increment(1);
    if leaked {
        counter!(LEAKS_TOTAL).increment(1);
    }
}

/// Only the current IP's series reads 1
pub(crate) fn record_public_ip(previous: Option<&str>, current: &str) {
    if let Some(old) = previous.filter(|old| *old != current) {
        gauge!(PUBLIC_IP_INFO, "ip" => old.to_string()).set(0.0);
    }
    gauge!(PUBLIC_IP_INFO, "ip" => current.to_string()).set(1.0);
}

pub(crate) fn set_rotating(running: bool) {
    gauge!(ROTATION_IN_PROGRESS).set(if running { 1.0 } else { 0.0 });
}
