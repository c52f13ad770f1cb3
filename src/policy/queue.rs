use std::collections::HashSet;

use uuid::Uuid;

/// Priority-ordered index over the job registry.
///
/// Entries are kept sorted ascending by projected priority, so the job at
/// the front is the next to be offered a task slot. The registry stays
/// authoritative on priority values; the queue only orders ids.
#[derive(Debug, Default)]
pub struct PriorityQueue {
    entries: Vec<(f64, Uuid)>,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Insert a job, keeping ascending order. An entry with a priority equal
    /// to existing ones lands after them.
    pub fn insert(&mut self, priority: f64, job_id: Uuid) {
        let at = self
            .entries
            .partition_point(|(p, _)| p.total_cmp(&priority).is_le());
        self.entries.insert(at, (priority, job_id));
    }

    /// Remove a job's entry. Returns false if it was not present.
    pub fn remove(&mut self, job_id: &Uuid) -> bool {
        match self.entries.iter().position(|(_, id)| id == job_id) {
            Some(at) => {
                self.entries.remove(at);
                true
            }
            None => false,
        }
    }

    /// Move a job to the position its new priority sorts to.
    pub fn reposition(&mut self, job_id: Uuid, priority: f64) {
        self.remove(&job_id);
        self.insert(priority, job_id);
    }

    /// The first job in ascending priority order not in `exclude`. Skipped
    /// entries keep their positions.
    pub fn select(&self, exclude: &HashSet<Uuid>) -> Option<Uuid> {
        self.entries
            .iter()
            .map(|(_, id)| *id)
            .find(|id| !exclude.contains(id))
    }

    /// Replace all entries, sorted ascending with the id as tiebreak.
    pub fn rebuild(&mut self, entries: impl IntoIterator<Item = (f64, Uuid)>) {
        self.entries = entries.into_iter().collect();
        self.entries
            .sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    }

    /// Entries in scheduling order.
    pub fn iter(&self) -> impl Iterator<Item = (f64, Uuid)> + '_ {
        self.entries.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(queue: &PriorityQueue) -> Vec<Uuid> {
        queue.iter().map(|(_, id)| id).collect()
    }

    #[test]
    fn insert_keeps_ascending_order() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut queue = PriorityQueue::new();
        queue.insert(-0.5, b);
        queue.insert(-1.0, a);
        queue.insert(0.25, c);

        assert_eq!(ids(&queue), vec![a, b, c]);
        let priorities: Vec<f64> = queue.iter().map(|(p, _)| p).collect();
        assert!(priorities.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn equal_priorities_land_after_existing_entries() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut queue = PriorityQueue::new();
        queue.insert(-0.5, a);
        queue.insert(-0.5, b);
        assert_eq!(ids(&queue), vec![a, b]);

        // Repositioning to the same priority moves behind the tie.
        queue.reposition(a, -0.5);
        assert_eq!(ids(&queue), vec![b, a]);
    }

    #[test]
    fn remove_is_idempotent() {
        let a = Uuid::new_v4();
        let mut queue = PriorityQueue::new();
        queue.insert(-1.0, a);

        assert!(queue.remove(&a));
        assert!(!queue.remove(&a));
        assert!(queue.is_empty());
    }

    #[test]
    fn select_skips_excluded_entries() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut queue = PriorityQueue::new();
        queue.insert(-1.0, a);
        queue.insert(-0.5, b);

        assert_eq!(queue.select(&HashSet::new()), Some(a));
        assert_eq!(queue.select(&HashSet::from([a])), Some(b));
        assert_eq!(queue.select(&HashSet::from([a, b])), None);
        // Skipping never reorders anything.
        assert_eq!(ids(&queue), vec![a, b]);
    }

    #[test]
    fn rebuild_sorts_and_breaks_ties_by_id() {
        let mut entries = vec![
            (0.5, Uuid::new_v4()),
            (-0.5, Uuid::new_v4()),
            (-0.5, Uuid::new_v4()),
            (-1.0, Uuid::new_v4()),
        ];
        let mut queue = PriorityQueue::new();
        queue.rebuild(entries.clone());

        entries.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        let expected: Vec<Uuid> = entries.iter().map(|(_, id)| *id).collect();
        assert_eq!(ids(&queue), expected);
        assert_eq!(queue.len(), 4);
    }
}
