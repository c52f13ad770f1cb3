use uuid::Uuid;

use crate::policy::server::PriorityRevision;

/// One responsive job's polled usage, paired with the record fields the
/// revision is computed from.
#[derive(Debug, Clone)]
pub struct JobUsage {
    pub id: Uuid,
    pub pending_tasks: u64,
    pub running_tasks: u64,
    pub priority: f64,
    pub cputime: u64,
}

/// Compute one revision batch from the jobs that answered this tick.
///
/// Each job's nominal share is `total_cores / jobs`. A job with fewer
/// pending tasks than its share cannot use it all and donates the unused
/// portion, which is split evenly among the jobs that can. Each job's new
/// priority folds the normalized gap between its running tasks and its
/// effective share into the old priority with an exponential moving average:
/// under-served jobs drift negative (scheduled sooner), over-consumers drift
/// positive.
pub fn compute_revisions(
    usages: &[JobUsage],
    total_cores: u64,
    alpha: f64,
) -> Vec<PriorityRevision> {
    if usages.is_empty() || total_cores == 0 {
        return Vec::new();
    }

    let cores = total_cores as f64;
    let share = cores / usages.len() as f64;

    let donated: f64 = usages
        .iter()
        .filter(|usage| (usage.pending_tasks as f64) < share)
        .map(|usage| share - usage.pending_tasks as f64)
        .sum();
    let needy = usages
        .iter()
        .filter(|usage| (usage.pending_tasks as f64) >= share)
        .count();
    // With no job able to absorb the donations there is nobody to hand the
    // extra to this tick.
    let extra_share = if needy > 0 { donated / needy as f64 } else { 0.0 };

    usages
        .iter()
        .map(|usage| {
            let pending = usage.pending_tasks as f64;
            let my_share = if pending < share {
                pending
            } else {
                share + extra_share
            };
            let deficit = (usage.running_tasks as f64 - my_share) / cores;

            PriorityRevision {
                id: usage.id,
                priority: alpha * deficit + (1.0 - alpha) * usage.priority,
                bias: 0.0,
                cputime: usage.cputime + usage.running_tasks,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-9;

    fn usage(pending: u64, running: u64, priority: f64) -> JobUsage {
        JobUsage {
            id: Uuid::new_v4(),
            pending_tasks: pending,
            running_tasks: running,
            priority,
            cputime: 0,
        }
    }

    #[test]
    fn single_job_on_single_core() {
        // One job holding its exact share: deficit 0, priority decays
        // halfway toward zero under alpha 0.5.
        let usages = vec![usage(5, 1, -1.0)];
        let revisions = compute_revisions(&usages, 1, 0.5);

        assert_eq!(revisions.len(), 1);
        assert!((revisions[0].priority - (-0.5)).abs() < TOLERANCE);
        assert_eq!(revisions[0].bias, 0.0);
        assert_eq!(revisions[0].cputime, 1);
    }

    #[test]
    fn balanced_jobs_converge_to_zero() {
        // Two jobs each running exactly their share of two cores; with
        // alpha 1 the history is discarded and both land on zero.
        let usages = vec![usage(10, 1, -1.0), usage(10, 1, -0.5)];
        let revisions = compute_revisions(&usages, 2, 1.0);

        for revision in &revisions {
            assert!(revision.priority.abs() < TOLERANCE);
        }
    }

    #[test]
    fn idle_job_donates_its_share_to_the_busy_one() {
        // Two cores. The idle job pends nothing and donates its full share
        // of 1; the busy job absorbs it (my_share = 2), so running both
        // cores is not over-consumption: deficit 0 for both.
        let busy = usage(10, 2, -1.0);
        let idle = usage(0, 0, -0.5);
        let revisions = compute_revisions(&[busy, idle], 2, 1.0);

        assert!(revisions[0].priority.abs() < TOLERANCE);
        assert!(revisions[1].priority.abs() < TOLERANCE);
    }

    #[test]
    fn over_consumer_drifts_positive_starved_job_drifts_negative() {
        // Two cores, both jobs have work pending, so neither donates. The
        // job hogging both cores runs one past its share (deficit 0.5); the
        // starved one runs one below (deficit -0.5). It ends up ahead in
        // the queue.
        let hog = usage(10, 2, -1.0);
        let starved = usage(2, 0, -0.5);
        let revisions = compute_revisions(&[hog, starved], 2, 1.0);

        assert!((revisions[0].priority - 0.5).abs() < TOLERANCE);
        assert!((revisions[1].priority - (-0.5)).abs() < TOLERANCE);
        assert!(revisions[1].priority < revisions[0].priority);
    }

    #[test]
    fn donations_without_needy_jobs_are_dropped() {
        // Every job pends below its share, so everyone donates and nobody
        // receives; the guarded division must not blow up.
        let usages = vec![usage(0, 2, -1.0), usage(0, 0, -0.5)];
        let revisions = compute_revisions(&usages, 2, 1.0);

        // First job: my_share = pending = 0, deficit = (2 - 0) / 2 = 1.
        assert!((revisions[0].priority - 1.0).abs() < TOLERANCE);
        // Second job: my_share = 0, deficit = 0.
        assert!(revisions[1].priority.abs() < TOLERANCE);
    }

    #[test]
    fn donated_excess_is_split_among_needy_jobs() {
        // Four cores, four jobs: two donors with nothing pending, two needy.
        // Each donor gives up its full share of 1; each needy job receives
        // half of the pool of 2.
        let usages = vec![
            usage(0, 0, 0.0),
            usage(0, 0, 0.0),
            usage(8, 1, 0.0),
            usage(8, 1, 0.0),
        ];
        let revisions = compute_revisions(&usages, 4, 1.0);

        // Needy jobs: my_share = 1 + 1 = 2, deficit = (1 - 2) / 4 = -0.25.
        assert!((revisions[2].priority - (-0.25)).abs() < TOLERANCE);
        assert!((revisions[3].priority - (-0.25)).abs() < TOLERANCE);
        // Sum of donations equals needy count times the extra share.
        let donated: f64 = 1.0 + 1.0;
        let extra: f64 = 1.0;
        assert!((donated - 2.0 * extra).abs() < TOLERANCE);
    }

    #[test]
    fn ema_blends_old_priority_with_deficit() {
        // Over-consumer: pending 4 >= share 2, no donors, my_share = 2,
        // deficit = (4 - 2) / 4 = 0.5.
        let usages = vec![usage(4, 4, -0.8), usage(4, 0, -0.2)];
        let revisions = compute_revisions(&usages, 4, 0.25);

        let expected_first = 0.25 * 0.5 + 0.75 * (-0.8);
        let expected_second = 0.25 * (-0.5) + 0.75 * (-0.2);
        assert!((revisions[0].priority - expected_first).abs() < TOLERANCE);
        assert!((revisions[1].priority - expected_second).abs() < TOLERANCE);
    }

    #[test]
    fn cputime_accumulates_running_samples() {
        let mut job = usage(3, 2, 0.0);
        job.cputime = 7;
        let revisions = compute_revisions(&[job], 4, 0.5);
        assert_eq!(revisions[0].cputime, 9);
    }

    #[test]
    fn empty_input_and_zero_cores_yield_no_revisions() {
        assert!(compute_revisions(&[], 4, 0.5).is_empty());
        assert!(compute_revisions(&[usage(1, 1, 0.0)], 0, 0.5).is_empty());
    }
}
