//! Registry-refresh and closing-sweep timers

use chrono::Utc;
use cron::Schedule;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::chain::ChainClient;
use crate::closer::{EpochCloser, SweepReport};
use crate::config::ScheduleConfig;
use crate::error::KeeperResult;
use crate::registry::PoolRegistry;
use crate::status::StatusBoard;

/// Drives refreshes and sweeps. A trigger that fires while the previous run
/// of the same job is still going is dropped, not queued.
pub struct Scheduler {
    registry: Arc<PoolRegistry>,
    closer: Arc<EpochCloser>,
    chain: Arc<dyn ChainClient>,
    status: StatusBoard,
    refresh_schedule: Schedule,
    sweep_schedule: Schedule,
    health_check_every: u64,
    refresh_gate: Arc<Mutex<()>>,
    sweep_gate: Arc<Mutex<()>>,
    sweeps: AtomicU64,
}

impl Scheduler {
    pub fn new(
        registry: Arc<PoolRegistry>,
        closer: Arc<EpochCloser>,
        chain: Arc<dyn ChainClient>,
        status: StatusBoard,
        schedule: &ScheduleConfig,
    ) -> KeeperResult<Self> {
        Ok(Self {
            registry,
            closer,
            chain,
            status,
            refresh_schedule: schedule.refresh_schedule()?,
            sweep_schedule: schedule.sweep_schedule()?,
            health_check_every: schedule.health_check_every,
            refresh_gate: Arc::new(Mutex::new(())),
            sweep_gate: Arc::new(Mutex::new(())),
            sweeps: AtomicU64::new(0),
        })
    }

    /// Refresh the pool registry. Returns `None` when a refresh is already
    /// running, otherwise the number of active pools.
    pub async fn trigger_refresh(&self) -> Option<KeeperResult<usize>> {
        let Ok(_gate) = self.refresh_gate.clone().try_lock_owned() else {
            info!("Registry refresh still running, skipping trigger");
            return None;
        };

        match self.registry.refresh().await {
            Ok(pools) => {
                self.status.retain(|pool| pools.contains_key(pool)).await;
                Some(Ok(pools.len()))
            }
            Err(e) => {
                let kept = self.registry.snapshot().await.len();
                warn!(error = %e, pools = kept, "Registry refresh failed, keeping last known pools");
                Some(Err(e))
            }
        }
    }

    /// Run one closing sweep over the current registry snapshot. Returns
    /// `None` when the previous sweep has not finished.
    pub async fn trigger_sweep(&self) -> Option<SweepReport> {
        let Ok(_gate) = self.sweep_gate.clone().try_lock_owned() else {
            info!("Previous sweep still running, skipping trigger");
            return None;
        };

        let sweep = self.sweeps.fetch_add(1, Ordering::Relaxed) + 1;
        if self.health_check_every > 0 && sweep % self.health_check_every == 0 {
            self.check_health().await;
        }

        let pools = self.registry.snapshot().await;
        if pools.is_empty() {
            info!(sweep, "No active pools, nothing to sweep");
        }

        let report = self.closer.sweep(&pools).await;
        info!(sweep, "Sweep complete: {}", report);
        Some(report)
    }

    /// Number of sweeps started so far
    pub fn sweeps(&self) -> u64 {
        self.sweeps.load(Ordering::Relaxed)
    }

    async fn check_health(&self) {
        match self.chain.health_check().await {
            Ok(report) if report.low_balance() => warn!(
                signer = %self.chain.signer(),
                balance = report.balance_lamports,
                minimum = report.min_balance_lamports,
                "Keeper balance is low"
            ),
            Ok(report) => debug!(balance = report.balance_lamports, "Health check passed"),
            Err(e) => warn!(error = %e, "Health check failed"),
        }
    }

    /// Refresh and sweep once, then follow both schedules until shutdown
    pub async fn run(self: Arc<Self>, shutdown: broadcast::Receiver<()>) {
        self.trigger_refresh().await;
        self.trigger_sweep().await;

        info!(dry_run = self.closer.is_dry_run(), "Scheduler started");

        let refresh = self.clone().follow(Job::Refresh, shutdown.resubscribe());
        let sweep = self.clone().follow(Job::Sweep, shutdown);
        tokio::join!(refresh, sweep);

        // Submissions already sent are left to finish
        let _refresh = self.refresh_gate.lock().await;
        let _sweep = self.sweep_gate.lock().await;
        info!("Scheduler stopped");
    }

    async fn follow(self: Arc<Self>, job: Job, mut shutdown: broadcast::Receiver<()>) {
        let schedule = match job {
            Job::Refresh => self.refresh_schedule.clone(),
            Job::Sweep => self.sweep_schedule.clone(),
        };

        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                warn!(?job, "Schedule has no upcoming time");
                return;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            debug!(?job, next = %next, "Next trigger");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    // Overlapping triggers are dropped by the job's gate
                    let this = self.clone();
                    tokio::spawn(async move {
                        match job {
                            Job::Refresh => {
                                this.trigger_refresh().await;
                            }
                            Job::Sweep => {
                                this.trigger_sweep().await;
                            }
                        }
                    });
                }
                _ = shutdown.recv() => {
                    debug!(?job, "Shutdown received");
                    return;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Job {
    Refresh,
    Sweep,
}
