//! Case id generators

use std::sync::atomic::{AtomicU64, Ordering};

/// Produces case ids for new recordings
pub trait CaseIdGenerator: Send + Sync + std::fmt::Debug {
    /// Next case id
    fn next_id(&self) -> String;

    /// Whether an id naming an existing on-disk case replaces it.
    ///
    /// When `false` the recorder draws another id instead.
    fn overwrites_existing(&self) -> bool {
        false
    }
}

/// `tc-` followed by eight hex characters of a random UUID (the default)
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomCaseIds;

impl CaseIdGenerator for RandomCaseIds {
    fn next_id(&self) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!("tc-{}", &id[..8])
    }
}

/// `"0"`, `"1"`, `"2"`, ...
#[derive(Debug, Default)]
pub struct SequentialCaseIds {
    next: AtomicU64,
}

impl SequentialCaseIds {
    /// Start counting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Start counting at `start`
    pub fn starting_at(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }
}

impl CaseIdGenerator for SequentialCaseIds {
    fn next_id(&self) -> String {
        self.next.fetch_add(1, Ordering::Relaxed).to_string()
    }
}

/// Always the same id; re-recording overwrites the previous case
#[derive(Debug, Clone)]
pub struct FixedCaseId(pub String);

impl CaseIdGenerator for FixedCaseId {
    fn next_id(&self) -> String {
        self.0.clone()
    }

    fn overwrites_existing(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod ids_tests {
    use super::*;

    #[test]
    fn test_random_ids_have_prefix() {
        let a = RandomCaseIds.next_id();
        let b = RandomCaseIds.next_id();
        assert!(a.starts_with("tc-"));
        assert_eq!(a.len(), 11);
        assert_ne!(a, b);
    }

    #[test]
    fn test_sequential_ids() {
        let ids = SequentialCaseIds::starting_at(3);
        assert_eq!(ids.next_id(), "3");
        assert_eq!(ids.next_id(), "4");
        assert!(!ids.overwrites_existing());
        assert!(FixedCaseId("x".into()).overwrites_existing());
    }
}
