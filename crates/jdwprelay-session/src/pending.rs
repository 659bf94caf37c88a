use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Acknowledged ids remembered per session. Oldest are forgotten first.
pub const RETIRED_CAPACITY: usize = 64 * 1024;

/// Outcome of [`PendingAckTable::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Admission {
    Tracked,
    /// The id is still waiting for its acknowledgment.
    AlreadyPending,
    /// The id was acknowledged before and may not be tracked again.
    AlreadyAcknowledged,
}

#[derive(Debug, Default)]
struct Entries {
    pending: HashMap<String, Instant>,
    retired: HashSet<String>,
    retired_order: VecDeque<String>,
}

impl Entries {
    fn retire(&mut self, id: &str) {
        if !self.retired.insert(id.to_string()) {
            return;
        }
        self.retired_order.push_back(id.to_string());
        if self.retired_order.len() > RETIRED_CAPACITY {
            if let Some(oldest) = self.retired_order.pop_front() {
                self.retired.remove(&oldest);
            }
        }
    }
}

/// Sent envelopes still waiting for their delivery acknowledgment.
///
/// Every operation takes the table lock exactly once.
/// Acknowledged ids are retired: they cannot be tracked a second time, so a
/// late duplicate acknowledgment never clears an unrelated entry.
#[derive(Debug, Default)]
pub struct PendingAckTable {
    entries: Mutex<Entries>,
}

impl PendingAckTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id` as sent at `sent_at`.
    ///
    /// A still-pending id keeps its original timestamp.
    pub fn insert(&self, id: &str, sent_at: Instant) -> Admission {
        let mut entries = self.lock();
        if entries.retired.contains(id) {
            return Admission::AlreadyAcknowledged;
        }
        if entries.pending.contains_key(id) {
            return Admission::AlreadyPending;
        }
        entries.pending.insert(id.to_string(), sent_at);
        Admission::Tracked
    }

    /// Settle `id` with its acknowledgment, returning when it was sent.
    ///
    /// The id is retired; an unknown id is ignored.
    pub fn acknowledge(&self, id: &str) -> Option<Instant> {
        let mut entries = self.lock();
        let sent_at = entries.pending.remove(id)?;
        entries.retire(id);
        Some(sent_at)
    }

    /// Drop `id` without retiring it, for a send that never left.
    pub fn discard(&self, id: &str) -> Option<Instant> {
        self.lock().pending.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().pending.contains_key(id)
    }

    pub fn is_retired(&self, id: &str) -> bool {
        self.lock().retired.contains(id)
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    /// The oldest entry whose age at `now` exceeds `threshold`.
    pub fn first_overdue(&self, now: Instant, threshold: Duration) -> Option<(String, Duration)> {
        self.lock()
            .pending
            .iter()
            .map(|(id, sent_at)| (id, now.saturating_duration_since(*sent_at)))
            .filter(|(_, age)| *age > threshold)
            .max_by_key(|(_, age)| *age)
            .map(|(id, age)| (id.clone(), age))
    }

    /// Forget every pending entry. Retired ids stay retired.
    pub fn clear(&self) {
        self.lock().pending.clear();
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn insert_rejects_duplicate_pending_id() {
        let table = PendingAckTable::new();
        let t0 = Instant::now();
        assert_eq!(table.insert("1", t0), Admission::Tracked);
        assert_eq!(
            table.insert("1", t0 + Duration::from_secs(5)),
            Admission::AlreadyPending
        );
        assert_eq!(table.acknowledge("1"), Some(t0));
    }

    #[test]
    fn acknowledged_id_is_never_tracked_again() {
        let table = PendingAckTable::new();
        let t0 = Instant::now();
        assert_eq!(table.insert("1", t0), Admission::Tracked);
        assert_eq!(table.acknowledge("1"), Some(t0));

        assert_eq!(table.insert("1", t0), Admission::AlreadyAcknowledged);
        assert!(table.is_retired("1"));
        assert!(table.is_empty());
        // A late duplicate acknowledgment is a no-op.
        assert_eq!(table.acknowledge("1"), None);
    }

    #[test]
    fn discarded_id_can_be_sent_again() {
        let table = PendingAckTable::new();
        let t0 = Instant::now();
        assert_eq!(table.insert("1", t0), Admission::Tracked);
        assert_eq!(table.discard("1"), Some(t0));
        assert!(!table.is_retired("1"));
        assert_eq!(table.insert("1", t0), Admission::Tracked);
    }

    #[test]
    fn retired_ids_are_bounded() {
        let table = PendingAckTable::new();
        let t0 = Instant::now();
        for i in 0..=RETIRED_CAPACITY {
            let id = i.to_string();
            assert_eq!(table.insert(&id, t0), Admission::Tracked);
            table.acknowledge(&id);
        }
        assert!(!table.is_retired("0"));
        assert!(table.is_retired("1"));
        assert!(table.is_retired(&RETIRED_CAPACITY.to_string()));
    }

    #[test]
    fn overdue_uses_strictly_greater_age() {
        let table = PendingAckTable::new();
        let t0 = Instant::now();
        let _ = table.insert("fresh", t0 + Duration::from_secs(30));
        let _ = table.insert("edge", t0);

        let threshold = Duration::from_secs(60);
        assert!(table
            .first_overdue(t0 + Duration::from_secs(60), threshold)
            .is_none());

        let (id, age) = table
            .first_overdue(t0 + Duration::from_secs(61), threshold)
            .unwrap();
        assert_eq!(id, "edge");
        assert_eq!(age, Duration::from_secs(61));
    }

    #[test]
    fn oldest_overdue_entry_is_reported() {
        let table = PendingAckTable::new();
        let t0 = Instant::now();
        let _ = table.insert("older", t0);
        let _ = table.insert("newer", t0 + Duration::from_secs(1));

        let (id, _) = table
            .first_overdue(t0 + Duration::from_secs(120), Duration::from_secs(60))
            .unwrap();
        assert_eq!(id, "older");
    }

    #[test]
    fn concurrent_insert_remove_and_sweep() {
        let table = Arc::new(PendingAckTable::new());
        let t0 = Instant::now();

        let writers: Vec<_> = (0..4)
            .map(|w| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    for i in 0..500 {
                        let id = format!("{w}-{i}");
                        assert_eq!(table.insert(&id, t0), Admission::Tracked);
                        if i % 2 == 0 {
                            assert_eq!(table.acknowledge(&id), Some(t0));
                        }
                    }
                })
            })
            .collect();

        let sweeper = {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                for _ in 0..200 {
                    let _ = table.first_overdue(t0, Duration::from_secs(60));
                    let _ = table.len();
                }
            })
        };

        for writer in writers {
            writer.join().unwrap();
        }
        sweeper.join().unwrap();

        assert_eq!(table.len(), 4 * 250);
        assert!(table.contains("3-499"));
        assert!(!table.contains("3-498"));
        assert!(table.is_retired("3-498"));
    }
}
