//! Scheduler
//!
//! Long-running loops driving the guard:
//!
//! - **Health**: fixed interval. The first tick fires immediately, which
//!   doubles as the startup probe.
//! - **Rotation**: sleeps until the next daily wall-clock target.
//! - **Port sync**: fixed interval, only when configured.
//!
//! Every loop stops at its next sleep boundary once the shutdown token
//! is cancelled.

use crate::config::{ConfigError, GuardConfig};
use crate::guard::Guard;
use chrono::{DateTime, Local, NaiveTime, TimeZone};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Source of the current wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// The system clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Time from `now` until the next occurrence of `at`.
///
/// A target equal to `now` is due immediately. A target that falls in
/// a DST gap moves forward by an hour; an ambiguous one takes the
/// earlier instant.
pub fn until_next_daily<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> Duration {
    let tz = now.timezone();
    let mut date = now.date_naive();

    // Two days always suffice; the third covers a gap on the next day.
    for _ in 0..3 {
        let naive = date.and_time(at);
        let target = tz
            .from_local_datetime(&naive)
            .earliest()
            .or_else(|| tz.from_local_datetime(&(naive + chrono::Duration::hours(1))).earliest());

        if let Some(target) = target {
            if target >= *now {
                return target
                    .signed_duration_since(now.clone())
                    .to_std()
                    .unwrap_or_default();
            }
        }

        match date.succ_opt() {
            Some(next) => date = next,
            None => break,
        }
    }

    Duration::from_secs(24 * 60 * 60)
}

/// Loop settings taken from the guard configuration
pub struct Scheduler {
    health_interval: Duration,
    daily_at: NaiveTime,
    port_sync_interval: Option<Duration>,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    pub fn from_config(config: &GuardConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            health_interval: config.health.interval(),
            daily_at: config.rotation.daily_at()?,
            port_sync_interval: config.port_sync.as_ref().map(|s| s.interval()),
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the clock used by the rotation loop
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Start every loop on its own task
    pub fn spawn(self, guard: Arc<Guard>, shutdown: CancellationToken) -> JoinSet<()> {
        let mut tasks = JoinSet::new();

        tasks.spawn(health_loop(guard.clone(), self.health_interval, shutdown.clone()));
        tasks.spawn(rotation_loop(
            guard.clone(),
            self.daily_at,
            self.clock,
            shutdown.clone(),
        ));
        if let Some(interval) = self.port_sync_interval {
            tasks.spawn(port_sync_loop(guard, interval, shutdown));
        }

        info!(
            health_interval = ?self.health_interval,
            daily_at = %self.daily_at,
            port_sync = self.port_sync_interval.is_some(),
            "Scheduler started"
        );
        tasks
    }
}

/// Periodic health checks
pub async fn health_loop(guard: Arc<Guard>, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                // Failures are logged and reported inside the check.
                let _ = guard.health_check().await;
            }
        }
    }
    debug!("Health loop stopped");
}

/// Daily rotation at `at`, local time
pub async fn rotation_loop(
    guard: Arc<Guard>,
    at: NaiveTime,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
) {
    loop {
        let now = clock.now();
        let wait = until_next_daily(&now, at);
        if let Some(next) = chrono::Duration::from_std(wait)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
        {
            guard.state.set_next_rotation(next).await;
            info!(next = %next, "Next rotation scheduled");
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(wait) => guard.rotate().await,
        }
    }
    debug!("Rotation loop stopped");
}

/// Periodic forwarded-port sync
pub async fn port_sync_loop(guard: Arc<Guard>, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = guard.sync_forwarded_port().await {
                    warn!(error = %e, "Forwarded port sync failed");
                }
            }
        }
    }
    debug!("Port sync loop stopped");
}
