use std::collections::{HashMap, HashSet};
use std::time::Duration;

use clap::Parser;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use fairshare::config::SchedulerConfig;
use fairshare::fairness::FairnessController;
use fairshare::policy::job::{JobHandle, TaskStats};
use fairshare::policy::server::{NextJob, NodeCapacity, PolicyServer};
use fairshare::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "fairshare")]
#[command(about = "Fair-share scheduling policy with a simulated cluster workload")]
struct Args {
    /// EMA smoothing coefficient in (0, 1]
    #[arg(long, default_value = "0.5")]
    alpha: f64,

    /// Number of cluster nodes to report
    #[arg(long, default_value = "4")]
    nodes: u64,

    /// Cores per cluster node
    #[arg(long, default_value = "8")]
    cores_per_node: u64,

    /// Number of synthetic jobs to register
    #[arg(long, default_value = "6")]
    jobs: usize,

    /// How long to run the simulation before exiting
    #[arg(long, default_value = "10")]
    duration_secs: u64,

    /// Print the final registry snapshot as JSON on exit
    #[arg(long)]
    dump: bool,
}

/// Events consumed by a simulated job process.
#[derive(Debug)]
enum SimEvent {
    /// The task scheduler launched one of our pending tasks.
    Launch,
    /// A previously launched task finished.
    TaskDone,
}

/// Spawn a simulated job process: answers stats polls and moves tasks from
/// pending to running to done with randomized runtimes.
fn spawn_sim_job(initial_pending: u64) -> (JobHandle, mpsc::Sender<SimEvent>) {
    let (handle, mut stats_rx) = JobHandle::channel();
    let (event_tx, mut event_rx) = mpsc::channel(64);
    let done_tx = event_tx.clone();

    tokio::spawn(async move {
        let mut pending = initial_pending;
        let mut running: u64 = 0;

        loop {
            tokio::select! {
                Some(req) = stats_rx.recv() => {
                    let _ = req.reply.send(TaskStats {
                        pending_tasks: pending,
                        running_tasks: running,
                    });
                }
                Some(event) = event_rx.recv() => match event {
                    SimEvent::Launch if pending > 0 => {
                        pending -= 1;
                        running += 1;
                        let runtime_ms = rand::thread_rng().gen_range(200..800);
                        let done_tx = done_tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(Duration::from_millis(runtime_ms)).await;
                            let _ = done_tx.send(SimEvent::TaskDone).await;
                        });
                    }
                    SimEvent::Launch => {}
                    SimEvent::TaskDone => running = running.saturating_sub(1),
                },
                else => break,
            }
        }
    });

    (handle, event_tx)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let shutdown = install_shutdown_handler();

    let config = SchedulerConfig::default().with_alpha(args.alpha).into_shared();

    let (server, message_rx) = PolicyServer::new();
    let policy = server.handle();
    let cores_rx = server.cores_watch();
    tokio::spawn(server.run(message_rx));

    let topology: Vec<NodeCapacity> = (1..=args.nodes)
        .map(|n| NodeCapacity {
            node_id: format!("node-{n}"),
            cores: args.cores_per_node,
        })
        .collect();
    policy.update_topology(topology).await?;

    // Register synthetic jobs with uneven backlogs so the fairness loop has
    // something to balance.
    let mut sims: HashMap<Uuid, mpsc::Sender<SimEvent>> = HashMap::new();
    for n in 1..=args.jobs {
        let backlog = rand::thread_rng().gen_range(5..50);
        let (handle, events) = spawn_sim_job(backlog);
        let id = Uuid::new_v4();
        policy.new_job(id, format!("job-{n}"), handle).await?;
        sims.insert(id, events);
    }

    let controller = FairnessController::new(policy.clone(), cores_rx, config);
    let controller_cancel = shutdown.clone();
    let controller_task = tokio::spawn(controller.run(controller_cancel));

    tracing::info!(
        jobs = args.jobs,
        total_cores = args.nodes * args.cores_per_node,
        alpha = args.alpha,
        "Simulation started"
    );

    // Task scheduler stand-in: keep asking which job deserves the next slot
    // and launch one of its tasks.
    let mut poll = tokio::time::interval(Duration::from_millis(50));
    let deadline = Instant::now() + Duration::from_secs(args.duration_secs);
    let mut launches: u64 = 0;
    loop {
        tokio::select! {
            _ = poll.tick() => {
                if Instant::now() >= deadline {
                    break;
                }
                match policy.next_job(HashSet::new()).await? {
                    NextJob::Selected(id) => {
                        if let Some(events) = sims.get(&id) {
                            let _ = events.send(SimEvent::Launch).await;
                            launches += 1;
                        }
                    }
                    NextJob::NoJobs => {}
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
    shutdown.cancel();
    let _ = controller_task.await;

    let snapshot = policy.snapshot_registry().await?;
    tracing::info!(launches, jobs = snapshot.len(), "Simulation finished");

    if args.dump {
        let mut infos: Vec<_> = snapshot.iter().map(|record| record.info()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        println!("{}", serde_json::to_string_pretty(&infos)?);
    }

    Ok(())
}
