//! Process-wide `{user -> active_count}` bookkeeping. The sole piece of
//! mutable shared state in the core; every mutation happens inside one
//! critical section so check-then-increment cannot race.

use std::collections::HashMap;
use std::sync::Mutex;

/// Result of `QuotaTable::try_admit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Rejected,
}

#[derive(Default)]
pub struct QuotaTable {
    counts: Mutex<HashMap<String, u32>>,
}

impl QuotaTable {
    pub fn new() -> Self {
        QuotaTable::default()
    }

    /// Atomically reads the current count for `user`; if it is already at
    /// `cap`, rejects without mutating. Otherwise increments and admits.
    pub fn try_admit(&self, user: &str, cap: u32) -> Admission {
        let mut counts = self.counts.lock().unwrap();
        let current = counts.get(user).copied().unwrap_or(0);
        if current >= cap {
            return Admission::Rejected;
        }
        counts.insert(user.to_string(), current + 1);
        Admission::Admitted
    }

    /// Decrements the active count for `user`; removes the key once it
    /// reaches zero. Calling this without a matching prior admission is a
    /// bug, but is made harmless (saturating) rather than panicking, since
    /// it runs on every session teardown path including error paths.
    pub fn release(&self, user: &str) {
        let mut counts = self.counts.lock().unwrap();
        if let std::collections::hash_map::Entry::Occupied(mut entry) = counts.entry(user.to_string()) {
            let count = entry.get_mut();
            *count = count.saturating_sub(1);
            if *count == 0 {
                entry.remove();
            }
        }
    }

    /// Current active count for `user`, `0` if absent. Exposed for tests
    /// and observability, not used by the admission/release path itself.
    pub fn active_count(&self, user: &str) -> u32 {
        *self.counts.lock().unwrap().get(user).unwrap_or(&0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn admits_up_to_cap_then_rejects() {
        let table = QuotaTable::new();
        assert_eq!(table.try_admit("u", 2), Admission::Admitted);
        assert_eq!(table.try_admit("u", 2), Admission::Admitted);
        assert_eq!(table.try_admit("u", 2), Admission::Rejected);
        assert_eq!(table.active_count("u"), 2);
    }

    #[test]
    fn release_removes_zero_count_keys() {
        let table = QuotaTable::new();
        table.try_admit("u", 1);
        table.release("u");
        assert_eq!(table.active_count("u"), 0);
        assert!(!table.counts.lock().unwrap().contains_key("u"));
    }

    #[test]
    fn rejection_does_not_mutate_count() {
        let table = QuotaTable::new();
        assert_eq!(table.try_admit("u", 0), Admission::Rejected);
        assert_eq!(table.active_count("u"), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_admit_never_exceeds_cap() {
        let table = Arc::new(QuotaTable::new());
        let cap = 4u32;
        let mut handles = Vec::new();
        for _ in 0..32 {
            let table = table.clone();
            handles.push(tokio::spawn(async move {
                if table.try_admit("u", cap) == Admission::Admitted {
                    assert!(table.active_count("u") <= cap);
                    table.release("u");
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(table.active_count("u"), 0);
    }
}
