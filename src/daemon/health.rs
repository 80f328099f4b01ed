use super::client::check_connection;
use super::process::HealthCheckPolicy;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const MIN_PROBE_INTERVAL: Duration = Duration::from_millis(10);

/// Whether a health probe is outstanding for a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HealthCheckState {
    #[default]
    Idle,
    InFlight,
}

/// Result of recording one probe outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    /// Probe succeeded; `recovered` when it ended a failure streak
    Healthy { recovered: bool },
    /// Probe failed, threshold not reached yet
    Failing { failures: u32 },
    /// This failure reached the threshold; the process should be terminated
    Unhealthy { failures: u32 },
    /// Probe failed after the threshold was already reached
    StillUnhealthy { failures: u32 },
}

/// Per-process probe bookkeeping: in-flight guard plus consecutive failures.
#[derive(Debug, Clone, Default)]
pub struct HealthTracker {
    state: HealthCheckState,
    consecutive_failures: u32,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> HealthCheckState {
        self.state
    }

    pub fn failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Claim the probe slot. Returns false if a probe is already outstanding.
    pub fn try_begin(&mut self) -> bool {
        if self.state == HealthCheckState::InFlight {
            return false;
        }
        self.state = HealthCheckState::InFlight;
        true
    }

    /// Record a finished probe and release the slot.
    ///
    /// Only the failure that makes the count equal to `threshold` yields
    /// [`HealthVerdict::Unhealthy`], so one failure streak produces one
    /// terminate request.
    pub fn complete(&mut self, healthy: bool, threshold: u32) -> HealthVerdict {
        self.state = HealthCheckState::Idle;
        if healthy {
            let recovered = self.consecutive_failures > 0;
            self.consecutive_failures = 0;
            return HealthVerdict::Healthy { recovered };
        }

        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let failures = self.consecutive_failures;
        let threshold = threshold.max(1);
        if failures == threshold {
            HealthVerdict::Unhealthy { failures }
        } else if failures > threshold {
            HealthVerdict::StillUnhealthy { failures }
        } else {
            HealthVerdict::Failing { failures }
        }
    }
}

/// Answer to "may a probe run now?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProbeSlot {
    /// Slot claimed; run the probe
    Acquired,
    /// Previous probe still outstanding; skip this tick
    Busy,
    /// Record stopped, restarted or vanished; end the loop
    Retired,
}

/// Owner of the health state that a probe loop reports into.
pub(crate) trait HealthTarget: Send + Sync + 'static {
    fn begin_probe(&self, name: &str, generation: u64) -> impl Future<Output = ProbeSlot> + Send;

    fn finish_probe(
        &self,
        name: &str,
        generation: u64,
        healthy: bool,
    ) -> impl Future<Output = ()> + Send;
}

/// Spawn the periodic probe loop for one RUNNING process.
///
/// Each tick claims the slot through `target`; each probe runs as its own
/// task so a slow connect never delays the schedule. The first probe fires
/// one `interval` after the process became ready.
pub(crate) fn spawn_health_monitor<T: HealthTarget>(
    target: Arc<T>,
    name: String,
    generation: u64,
    policy: HealthCheckPolicy,
    socket_path: PathBuf,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Health checks for '{}' every {:?} (timeout {:?}, threshold {})",
            name, policy.interval, policy.timeout, policy.failure_threshold
        );

        let period = policy.interval.max(MIN_PROBE_INTERVAL);
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match target.begin_probe(&name, generation).await {
                ProbeSlot::Acquired => {}
                ProbeSlot::Busy => {
                    debug!(process = %name, "Previous health probe still in flight, skipping tick");
                    continue;
                }
                ProbeSlot::Retired => {
                    debug!(process = %name, generation, "Health monitor retired");
                    return;
                }
            }

            let target = Arc::clone(&target);
            let name = name.clone();
            let socket_path = socket_path.clone();
            tokio::spawn(async move {
                let healthy = match check_connection(&socket_path, Some(policy.timeout)).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(process = %name, "Health probe failed: {}", e);
                        false
                    }
                };
                target.finish_probe(&name, generation, healthy).await;
            });
        }
    })
}
