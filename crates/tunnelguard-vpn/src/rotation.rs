//! Rotation Orchestrator
//!
//! One rotation cycle, in fixed order:
//!
//! 1. Notify start
//! 2. Fetch candidates (failure: notify, stop)
//! 3. Keep the directory's top `max_candidates`
//! 4. Benchmark them concurrently
//! 5. Nothing responded: notify, stop, connection untouched
//! 6. Rank by score, highest first, stable
//! 7. Notify the winner
//! 8. Reconnect (failure is logged only)
//! 9. Flat grace period
//! 10. Re-resolve the IP, best effort, and report it
//! 11. Resume torrents, always
//!
//! Only one rotation runs at a time.

use crate::benchmark::BenchmarkedServer;
use crate::guard::Guard;
use crate::notifier::Notice;
use crate::telemetry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// How a rotation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationOutcome {
    /// Directory fetch failed or returned nothing usable
    CandidatesUnavailable,
    /// Every probe failed
    NoServerResponded,
    /// Reconnect was attempted against `server`
    Rotated {
        server: String,
        ip: Option<String>,
    },
}

/// Rotation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RotationError {
    #[error("Rotation already in progress")]
    InProgress,
}

/// Order by score, highest first. Equal scores keep their input order.
pub fn rank(mut results: Vec<BenchmarkedServer>) -> Vec<BenchmarkedServer> {
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results
}

/// Highest-scoring server
pub fn select_best(results: Vec<BenchmarkedServer>) -> Option<BenchmarkedServer> {
    rank(results).into_iter().next()
}

/// Exclusive hold on the rotation slot, released on drop
struct RotationClaim {
    rotating: Arc<AtomicBool>,
}

impl RotationClaim {
    fn acquire(rotating: &Arc<AtomicBool>) -> Result<Self, RotationError> {
        rotating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| RotationError::InProgress)?;
        telemetry::set_rotating(true);
        Ok(Self {
            rotating: rotating.clone(),
        })
    }
}

impl Drop for RotationClaim {
    fn drop(&mut self) {
        self.rotating.store(false, Ordering::Release);
        telemetry::set_rotating(false);
    }
}

impl Guard {
    /// Run a rotation, reporting only through the notifier
    pub async fn rotate(&self) {
        if let Err(e) = self.try_rotate().await {
            warn!(error = %e, "Rotation skipped");
        }
    }

    /// Run a rotation now, unless one is already running
    pub async fn try_rotate(&self) -> Result<RotationOutcome, RotationError> {
        let _claim = RotationClaim::acquire(&self.rotating)?;
        Ok(self.run_rotation().await)
    }

    /// Start a rotation in the background.
    ///
    /// Returns once the rotation is claimed; it then runs to completion
    /// on its own task.
    pub fn trigger_rotation(self: &Arc<Self>) -> Result<(), RotationError> {
        let claim = RotationClaim::acquire(&self.rotating)?;

        let guard = self.clone();
        tokio::spawn(async move {
            let _claim = claim;
            let outcome = guard.run_rotation().await;
            info!(?outcome, "Manual rotation finished");
        });
        Ok(())
    }

    async fn run_rotation(&self) -> RotationOutcome {
        info!("Starting VPN rotation");
        self.state.notify(Notice::RotationStarting).await;

        let mut candidates = match self.candidates.fetch().await {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(error = %e, "Failed to fetch candidate servers");
                let message = e.to_string();
                self.state
                    .notify(Notice::CandidatesUnavailable { error: &message })
                    .await;
                return RotationOutcome::CandidatesUnavailable;
            }
        };
        candidates.truncate(self.rotation.max_candidates);

        let results = match self.engine.benchmark_all(candidates).await {
            Ok(results) => results,
            Err(e) => {
                warn!(error = %e, "Rotation aborted");
                self.state.notify(Notice::NoServerResponded).await;
                return RotationOutcome::NoServerResponded;
            }
        };

        let Some(winner) = select_best(results) else {
            self.state.notify(Notice::NoServerResponded).await;
            return RotationOutcome::NoServerResponded;
        };

        info!(
            server = %winner.server.name,
            latency_ms = winner.latency.as_millis() as u64,
            score = winner.score,
            "Selected exit server"
        );
        self.state
            .notify(Notice::RotationWinner {
                name: &winner.server.name,
                latency: winner.latency,
                throughput: winner.throughput,
            })
            .await;

        if let Err(e) = self.reconnect.apply(&winner.server.name).await {
            error!(server = %winner.server.name, error = %e, "Reconnect failed");
        }

        tokio::time::sleep(self.rotation.grace_period()).await;

        // Confirmation only; the leak detector is not consulted here.
        let ip = match self.resolver.resolve(&self.state).await {
            Ok(ip) => Some(ip),
            Err(e) => {
                warn!(error = %e, "Could not resolve IP after rotation");
                None
            }
        };
        self.state
            .notify(Notice::RotationFinished { ip: ip.as_deref() })
            .await;

        if let Err(e) = self.gateway.resume_all().await {
            error!(error = %e, "Failed to resume torrents after rotation");
        }

        RotationOutcome::Rotated {
            server: winner.server.name,
            ip,
        }
    }
}
