use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use uuid::Uuid;

use crate::error::{PolicyError, Result};

const STATS_CHANNEL_CAPACITY: usize = 8;

/// Task counts reported by a job process in response to a stats poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    /// Tasks the job could start if offered cores.
    pub pending_tasks: u64,
    /// Tasks currently occupying cores.
    pub running_tasks: u64,
}

/// A single stats poll; the job process answers on `reply`.
#[derive(Debug)]
pub struct StatsRequest {
    pub reply: oneshot::Sender<TaskStats>,
}

/// Client half of a job process's stats channel.
///
/// The job process serves [`StatsRequest`]s from the receiver half. When the
/// process exits the receiver drops, which [`JobHandle::closed`] observes;
/// the policy server uses that as its lifecycle monitor.
#[derive(Debug, Clone)]
pub struct JobHandle {
    stats_tx: mpsc::Sender<StatsRequest>,
}

impl JobHandle {
    /// Create a handle plus the receiver the job process serves requests from.
    pub fn channel() -> (Self, mpsc::Receiver<StatsRequest>) {
        let (stats_tx, stats_rx) = mpsc::channel(STATS_CHANNEL_CAPACITY);
        (Self { stats_tx }, stats_rx)
    }

    /// Poll the job for its task counts, bounded by `deadline`.
    ///
    /// A job that has exited, drops the reply, or misses the deadline yields
    /// an error; callers treat all three as unresponsive for this round.
    pub async fn get_stats(&self, deadline: Duration) -> Result<TaskStats> {
        let (reply, reply_rx) = oneshot::channel();
        timeout(deadline, async {
            self.stats_tx
                .send(StatsRequest { reply })
                .await
                .map_err(|_| PolicyError::JobGone)?;
            reply_rx.await.map_err(|_| PolicyError::JobGone)
        })
        .await
        .map_err(|_| PolicyError::StatsTimeout)?
    }

    /// Resolves once the job process has dropped its end of the channel.
    pub async fn closed(&self) {
        self.stats_tx.closed().await;
    }
}

/// Registry entry for one live job.
///
/// The registry owns the authoritative `priority`; the queue carries the
/// `priority + bias` projection written at the last selection or revision.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: Uuid,
    pub name: String,
    /// More negative = scheduled sooner.
    pub priority: f64,
    /// Optimistic correction accumulated on selection between revisions;
    /// reset to zero by every revision.
    pub bias: f64,
    /// Accumulated running-task samples across revisions.
    pub cputime: u64,
    pub registered_at: DateTime<Utc>,
    pub handle: JobHandle,
}

impl JobRecord {
    pub fn new(id: Uuid, name: String, priority: f64, handle: JobHandle) -> Self {
        Self {
            id,
            name,
            priority,
            bias: 0.0,
            cputime: 0,
            registered_at: Utc::now(),
            handle,
        }
    }

    /// The queue position this record projects to.
    pub fn projected_priority(&self) -> f64 {
        self.priority + self.bias
    }

    /// Serializable view without the process handle.
    pub fn info(&self) -> JobInfo {
        JobInfo {
            id: self.id,
            name: self.name.clone(),
            priority: self.priority,
            bias: self.bias,
            cputime: self.cputime,
            registered_at: self.registered_at,
        }
    }
}

/// Introspection view of a job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: Uuid,
    pub name: String,
    pub priority: f64,
    pub bias: f64,
    pub cputime: u64,
    pub registered_at: DateTime<Utc>,
}
