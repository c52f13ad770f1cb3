use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::SharedConfig;
use crate::fairness::share::{compute_revisions, JobUsage};
use crate::policy::server::PolicyHandle;

/// Periodic loop that measures per-job usage and rewrites priorities.
///
/// The controller never touches the registry directly: it reads a snapshot,
/// polls each job's process under a hard deadline, and proposes a revision
/// batch that the policy server applies to whichever jobs still exist.
pub struct FairnessController {
    policy: PolicyHandle,
    cores_rx: watch::Receiver<u64>,
    config: SharedConfig,
}

impl FairnessController {
    pub fn new(policy: PolicyHandle, cores_rx: watch::Receiver<u64>, config: SharedConfig) -> Self {
        Self {
            policy,
            cores_rx,
            config,
        }
    }

    /// Run until cancelled. The period is read once at startup; `alpha` and
    /// the stats deadline are re-read every tick so they can be retuned live.
    pub async fn run(mut self, cancel: CancellationToken) {
        let period = Duration::from_millis(self.config.read().await.fairy_interval_ms);
        let mut ticker = tokio::time::interval(period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once().await;
                }
                _ = cancel.cancelled() => {
                    tracing::info!("Fairness controller stopping");
                    break;
                }
            }
        }
    }

    /// One revision: snapshot the registry, poll every job, recompute
    /// priorities, write back.
    pub async fn run_once(&mut self) {
        let (alpha, stats_deadline) = {
            let config = self.config.read().await;
            (
                config.alpha,
                Duration::from_millis(config.stats_timeout_ms),
            )
        };

        let total_cores = *self.cores_rx.borrow_and_update();
        if total_cores == 0 {
            tracing::debug!("No cores reported yet, skipping fairness tick");
            return;
        }

        let snapshot = match self.policy.snapshot_registry().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, "Registry snapshot failed, skipping fairness tick");
                return;
            }
        };
        if snapshot.is_empty() {
            return;
        }

        // Poll every job concurrently so the tick costs one deadline, not
        // one per job.
        let polls = join_all(snapshot.iter().map(|record| async move {
            (record, record.handle.get_stats(stats_deadline).await)
        }))
        .await;

        let mut usages = Vec::with_capacity(polls.len());
        for (record, outcome) in polls {
            match outcome {
                Ok(stats) => usages.push(JobUsage {
                    id: record.id,
                    pending_tasks: stats.pending_tasks,
                    running_tasks: stats.running_tasks,
                    priority: record.priority,
                    cputime: record.cputime,
                }),
                Err(e) => {
                    // Unresponsive this round; it keeps its priority and the
                    // next tick retries.
                    tracing::debug!(job_id = %record.id, error = %e, "Job skipped in fairness revision");
                }
            }
        }

        let revisions = compute_revisions(&usages, total_cores, alpha);
        if revisions.is_empty() {
            return;
        }

        tracing::debug!(
            jobs = revisions.len(),
            total_cores,
            alpha,
            "Submitting priority revision"
        );
        if let Err(e) = self.policy.apply_revisions(revisions).await {
            tracing::warn!(error = %e, "Failed to submit priority revision");
        }
    }
}
