//! tunnelguard - Network Privacy Guard
//!
//! Keeps a torrent client from exposing the operator's real IP when
//! the VPN tunnel degrades, and rotates daily to the best exit server.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── Scheduler ────────────────────────────┐
//! │                                                                   │
//! │  health (30 min)            rotation (daily 04:00)    port sync   │
//! │       │                            │                      │       │
//! └───────│────────────────────────────│──────────────────────│───────┘
//!         ▼                            ▼                      ▼
//!   ┌────────────┐   ┌───────────────────────────────┐  ┌──────────┐
//!   │ IpResolver │   │ CandidateSource               │  │ Torrent  │
//!   │     │      │   │   → BenchmarkEngine (fan-out) │  │ Gateway  │
//!   │     ▼      │   │   → select best               │  └──────────┘
//!   │ LeakDetect │   │   → ReconnectStrategy         │
//!   │     │      │   │   → grace, re-resolve, resume │
//!   │  pause +   │   └───────────────────────────────┘
//!   │  notify    │
//!   └────────────┘
//! ```
//!
//! # Safety behavior
//!
//! - A leak is the public IP equalling the configured real IP
//! - On a leak, torrents are paused before the operator is notified
//! - A rotation never reconnects unless at least one server responded
//! - After a rotation torrents are resumed unconditionally

mod benchmark;
mod candidate;
mod config;
mod guard;
mod leak;
mod notifier;
mod reconnect;
mod resolver;
mod rotation;
mod scheduler;
mod state;
mod telemetry;
mod torrent;

#[cfg(test)]
mod testing;

pub use benchmark::{score, BenchmarkEngine, BenchmarkError, BenchmarkedServer, ProbeError};
pub use candidate::{CandidateError, CandidateServer, CandidateSource};
pub use config::{
    ApiConfig, BenchmarkConfig, ConfigError, DirectoryConfig, GuardConfig, HealthConfig,
    PortSyncConfig, ReconnectConfig, RotationConfig,
};
pub use guard::{Guard, GuardError, GuardStatus};
pub use leak::{evaluate, LeakDetector, LeakStatus};
pub use notifier::{LogNotifier, Notice, Notifier, NotifyError};
pub use reconnect::{ReconnectError, ReconnectStrategy};
pub use resolver::{IpResolver, ResolveError};
pub use rotation::{rank, select_best, RotationError, RotationOutcome};
pub use scheduler::{
    health_loop, port_sync_loop, rotation_loop, until_next_daily, Clock, Scheduler, SystemClock,
};
pub use state::GuardState;
pub use telemetry::{
    describe_metrics, LEAKS_TOTAL, LEAK_CHECKS_TOTAL, PUBLIC_IP_INFO, ROTATION_IN_PROGRESS,
};
pub use torrent::{GatewayError, TorrentGateway};
