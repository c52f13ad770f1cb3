use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use crate::error::{PolicyError, Result};
use crate::policy::job::{JobHandle, JobRecord};
use crate::policy::queue::PriorityQueue;

const MESSAGE_CHANNEL_CAPACITY: usize = 256;

/// Capacity report for one cluster node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCapacity {
    pub node_id: String,
    pub cores: u64,
}

/// Outcome of a `next_job` query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextJob {
    /// Nothing schedulable: empty registry, zero cores, or every live job
    /// excluded by the caller.
    NoJobs,
    Selected(Uuid),
}

/// Revised record fields produced by the fairness controller for one job.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorityRevision {
    pub id: Uuid,
    pub priority: f64,
    /// Submitted as zero by the controller: a fresh measurement supersedes
    /// the selection-time corrections accumulated since the last revision.
    pub bias: f64,
    pub cputime: u64,
}

/// Messages handled by the policy server event loop.
#[derive(Debug)]
pub enum PolicyMessage {
    /// Which job should be offered the next task slot?
    NextJob {
        exclude: HashSet<Uuid>,
        reply: oneshot::Sender<NextJob>,
    },
    /// Register a newly submitted job.
    NewJob {
        id: Uuid,
        name: String,
        handle: JobHandle,
    },
    /// Sent by the per-job monitor task once the job process exits.
    JobTerminated { id: Uuid },
    /// Cluster topology changed; recompute the core total.
    UpdateTopology { nodes: Vec<NodeCapacity> },
    /// Batch of priority rewrites from the fairness controller.
    ApplyRevisions { revisions: Vec<PriorityRevision> },
    /// Coherent copy of the registry for the controller and introspection.
    SnapshotRegistry {
        reply: oneshot::Sender<Vec<JobRecord>>,
    },
}

/// Authoritative owner of the job registry, the priority queue, and the
/// cluster core total.
///
/// The server processes one message at a time in arrival order; every
/// handler completes without suspending, so the `next_job` critical path is
/// never blocked behind slower work.
pub struct PolicyServer {
    registry: HashMap<Uuid, JobRecord>,
    queue: PriorityQueue,
    total_cores: u64,
    cores_tx: watch::Sender<u64>,
    message_tx: mpsc::Sender<PolicyMessage>,
}

impl PolicyServer {
    pub fn new() -> (Self, mpsc::Receiver<PolicyMessage>) {
        let (message_tx, message_rx) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);
        let (cores_tx, _) = watch::channel(0);

        let server = Self {
            registry: HashMap::new(),
            queue: PriorityQueue::new(),
            total_cores: 0,
            cores_tx,
            message_tx,
        };

        (server, message_rx)
    }

    /// Typed client handle for this server.
    pub fn handle(&self) -> PolicyHandle {
        PolicyHandle {
            message_tx: self.message_tx.clone(),
        }
    }

    /// Subscribe to core total updates; the fairness controller holds one of
    /// these so topology changes reach it without a registry round-trip.
    pub fn cores_watch(&self) -> watch::Receiver<u64> {
        self.cores_tx.subscribe()
    }

    /// Serve messages for the lifetime of the process.
    pub async fn run(mut self, mut message_rx: mpsc::Receiver<PolicyMessage>) {
        while let Some(msg) = message_rx.recv().await {
            self.handle_message(msg);
        }
    }

    fn handle_message(&mut self, msg: PolicyMessage) {
        match msg {
            PolicyMessage::NextJob { exclude, reply } => {
                let _ = reply.send(self.next_job(&exclude));
            }
            PolicyMessage::NewJob { id, name, handle } => {
                self.register_job(id, name, handle);
            }
            PolicyMessage::JobTerminated { id } => {
                self.remove_job(id);
            }
            PolicyMessage::UpdateTopology { nodes } => {
                self.update_topology(&nodes);
            }
            PolicyMessage::ApplyRevisions { revisions } => {
                self.apply_revisions(revisions);
            }
            PolicyMessage::SnapshotRegistry { reply } => {
                let _ = reply.send(self.registry.values().cloned().collect());
            }
        }
    }

    fn next_job(&mut self, exclude: &HashSet<Uuid>) -> NextJob {
        if self.total_cores == 0 || self.registry.is_empty() {
            return NextJob::NoJobs;
        }
        let Some(id) = self.queue.select(exclude) else {
            return NextJob::NoJobs;
        };

        // Optimistically push the winner back as if it had already consumed
        // one more core, so repeated queries between revisions don't keep
        // handing out the same job. The next revision corrects any overshoot.
        let step = 1.0 / self.total_cores as f64;
        if let Some(record) = self.registry.get_mut(&id) {
            record.bias += step;
            self.queue.reposition(id, record.projected_priority());
        }

        NextJob::Selected(id)
    }

    fn register_job(&mut self, id: Uuid, name: String, handle: JobHandle) {
        // Later arrivals start closer to zero than the jobs already running.
        let initial_priority = -1.0 / self.registry.len().max(1) as f64;
        let record = JobRecord::new(id, name, initial_priority, handle.clone());

        tracing::info!(
            job_id = %id,
            name = %record.name,
            priority = initial_priority,
            "Job registered"
        );

        self.queue.insert(record.projected_priority(), id);
        self.registry.insert(id, record);
        self.spawn_monitor(id, handle);
    }

    /// Watch the job's process and report its exit back to the event loop.
    fn spawn_monitor(&self, id: Uuid, handle: JobHandle) {
        let message_tx = self.message_tx.clone();
        tokio::spawn(async move {
            handle.closed().await;
            let _ = message_tx.send(PolicyMessage::JobTerminated { id }).await;
        });
    }

    fn remove_job(&mut self, id: Uuid) {
        if self.registry.remove(&id).is_some() {
            self.queue.remove(&id);
            tracing::info!(job_id = %id, jobs = self.registry.len(), "Job removed");
        }
    }

    fn update_topology(&mut self, nodes: &[NodeCapacity]) {
        let total_cores: u64 = nodes.iter().map(|n| n.cores).sum();
        self.total_cores = total_cores;
        self.cores_tx.send_replace(total_cores);
        tracing::info!(nodes = nodes.len(), total_cores, "Cluster topology updated");
    }

    fn apply_revisions(&mut self, revisions: Vec<PriorityRevision>) {
        let submitted = revisions.len();
        let mut applied = 0usize;

        for revision in revisions {
            // Jobs can terminate between the controller's snapshot and this
            // write-back; their revisions are dropped.
            if let Some(record) = self.registry.get_mut(&revision.id) {
                record.priority = revision.priority;
                record.bias = revision.bias;
                record.cputime = revision.cputime;
                applied += 1;
            }
        }

        // Records the revision missed keep the projection written by their
        // last bias step.
        self.queue.rebuild(
            self.registry
                .values()
                .map(|record| (record.projected_priority(), record.id)),
        );

        tracing::debug!(submitted, applied, "Priority revision applied");
    }
}

/// Clonable client for the policy server.
///
/// All methods fail only once the server task is gone, which outside of
/// process shutdown does not happen.
#[derive(Debug, Clone)]
pub struct PolicyHandle {
    message_tx: mpsc::Sender<PolicyMessage>,
}

impl PolicyHandle {
    /// Pick the highest-preference job whose id is not in `exclude`.
    pub async fn next_job(&self, exclude: HashSet<Uuid>) -> Result<NextJob> {
        let (reply, reply_rx) = oneshot::channel();
        self.message_tx
            .send(PolicyMessage::NextJob { exclude, reply })
            .await
            .map_err(|_| PolicyError::ServerUnavailable)?;
        reply_rx.await.map_err(|_| PolicyError::ServerUnavailable)
    }

    /// Register a job. The id must be unique among live jobs.
    pub async fn new_job(
        &self,
        id: Uuid,
        name: impl Into<String>,
        handle: JobHandle,
    ) -> Result<()> {
        self.message_tx
            .send(PolicyMessage::NewJob {
                id,
                name: name.into(),
                handle,
            })
            .await
            .map_err(|_| PolicyError::ServerUnavailable)
    }

    pub async fn update_topology(&self, nodes: Vec<NodeCapacity>) -> Result<()> {
        self.message_tx
            .send(PolicyMessage::UpdateTopology { nodes })
            .await
            .map_err(|_| PolicyError::ServerUnavailable)
    }

    pub async fn apply_revisions(&self, revisions: Vec<PriorityRevision>) -> Result<()> {
        self.message_tx
            .send(PolicyMessage::ApplyRevisions { revisions })
            .await
            .map_err(|_| PolicyError::ServerUnavailable)
    }

    pub async fn snapshot_registry(&self) -> Result<Vec<JobRecord>> {
        let (reply, reply_rx) = oneshot::channel();
        self.message_tx
            .send(PolicyMessage::SnapshotRegistry { reply })
            .await
            .map_err(|_| PolicyError::ServerUnavailable)?;
        reply_rx.await.map_err(|_| PolicyError::ServerUnavailable)
    }
}
