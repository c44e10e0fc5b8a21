//! Per-caller invocation counters
//!
//! Counters map a caller case to the number of times each callee id has been
//! invoked under it. They assign ordinals: a read-then-increment yields the
//! zero-based occurrence index of the current call.

use std::collections::{BTreeMap, HashMap};

use crate::error::{Result, RewindError};
use crate::outcome::CaseKey;

/// Counts per callee id
pub type Counts = BTreeMap<String, u64>;

/// Mutable counter table, reset at session start
#[derive(Debug, Default, Clone)]
pub struct CounterState {
    counts: HashMap<CaseKey, Counts>,
}

impl CounterState {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the current count for `(caller, callee)` and increment it
    pub fn next_ordinal(&mut self, caller: &CaseKey, callee: &str) -> u64 {
        let slot = self
            .counts
            .entry(caller.clone())
            .or_default()
            .entry(callee.to_string())
            .or_insert(0);
        let ordinal = *slot;
        *slot += 1;
        ordinal
    }

    /// Current count for `(caller, callee)`
    pub fn get(&self, caller: &CaseKey, callee: &str) -> u64 {
        self.counts
            .get(caller)
            .and_then(|c| c.get(callee))
            .copied()
            .unwrap_or(0)
    }

    /// Copy of every count under `caller`
    pub fn snapshot(&self, caller: &CaseKey) -> Counts {
        self.counts.get(caller).cloned().unwrap_or_default()
    }

    /// Counts added under `caller` since `before` was taken.
    ///
    /// Only callees whose count grew appear in the result. A count that
    /// shrank means the table was modified outside the engine.
    pub fn delta(&self, caller: &CaseKey, before: &Counts) -> Result<Counts> {
        let after = self.counts.get(caller);
        let mut delta = Counts::new();

        for (callee, &was) in before {
            let now = after.and_then(|a| a.get(callee)).copied().unwrap_or(0);
            if now < was {
                return Err(RewindError::CounterCorruption {
                    fcid: caller.fcid.clone(),
                    tcid: caller.tcid.clone(),
                    stub: callee.clone(),
                    before: was,
                    after: now,
                });
            }
        }

        if let Some(after) = after {
            for (callee, &now) in after {
                let was = before.get(callee).copied().unwrap_or(0);
                if now > was {
                    delta.insert(callee.clone(), now - was);
                }
            }
        }
        Ok(delta)
    }

    /// Add `delta` to the counts under `caller`
    pub fn merge(&mut self, caller: &CaseKey, delta: &Counts) {
        let counts = self.counts.entry(caller.clone()).or_default();
        for (callee, n) in delta {
            *counts.entry(callee.clone()).or_insert(0) += n;
        }
    }

    /// Overwrite the counts under `caller`
    pub fn restore(&mut self, caller: &CaseKey, counts: Counts) {
        self.counts.insert(caller.clone(), counts);
    }

    /// Forget the counts under `caller`
    pub fn reset(&mut self, caller: &CaseKey) {
        self.counts.remove(caller);
    }

    /// Forget every count
    pub fn clear(&mut self) {
        self.counts.clear();
    }
}
