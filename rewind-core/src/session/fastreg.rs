//! Fast-path replay of recorded subtrees
//!
//! When a case recorded a nested recorded call, the caller's case directory
//! holds a fast-path fixture with that call's outcome and the stub invocations
//! it made. Replay with the fast path enabled returns the outcome and advances
//! the caller's stub counters by the recorded delta, without running the body.
//!
//! Only calls made directly by the replayed case are eligible; deeper calls
//! were recorded under their own parents' cases.

use std::collections::HashMap;
use tracing::debug;

use super::Session;
use crate::error::Result;
use crate::outcome::{CallResult, CaseKey, Inputs, capture};
use crate::registry::{Body, FunctionToken};
use crate::store::FastPathFixture;

/// Location of a fast-path fixture
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FastPathKey {
    /// Case that made the call
    pub caller: CaseKey,
    /// Called function id
    pub callee: String,
    /// Occurrence of `callee` under `caller`
    pub ordinal: u64,
    /// Input hash of the call
    pub hash: String,
}

/// Memoized fixture lookups, including misses
#[derive(Debug, Default)]
pub struct FastPathCache {
    entries: HashMap<FastPathKey, Option<FastPathFixture>>,
}

impl FastPathCache {
    /// Cached lookup result; `None` when the key was never looked up
    pub fn get(&self, key: &FastPathKey) -> Option<&Option<FastPathFixture>> {
        self.entries.get(key)
    }

    /// Remember a lookup result
    pub fn insert(&mut self, key: FastPathKey, fixture: Option<FastPathFixture>) {
        self.entries.insert(key, fixture);
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of memoized keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is memoized
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Session {
    pub(super) fn replay_recorded(&self, token: &FunctionToken, body: &Body, inputs: &Inputs) -> CallResult {
        let Some(caller) = self.context() else {
            return body(self, inputs);
        };
        let refreshing = self.refreshing.get();
        if self.replay_depth.get() > 0 || !(self.fast_path.get() || refreshing) {
            return self.run_nested(body, inputs);
        }

        let key = FastPathKey {
            hash: self.store.input_hash(inputs)?,
            ordinal: self.fastreg_counts.borrow_mut().next_ordinal(&caller, &token.fcid),
            callee: token.fcid.clone(),
            caller,
        };

        if refreshing {
            return self.refresh_fast_path(key, body, inputs);
        }

        match self.lookup_fast_path(&key)? {
            Some(fixture) => {
                self.stub_counts
                    .borrow_mut()
                    .merge(&key.caller, &fixture.stub_counter_delta);
                debug!(callee = %key.callee, caller = %key.caller, ordinal = key.ordinal, "fast path hit");
                fixture.outcome.into_result()
            }
            None => {
                debug!(callee = %key.callee, caller = %key.caller, ordinal = key.ordinal, "fast path miss");
                self.run_nested(body, inputs)
            }
        }
    }

    fn lookup_fast_path(&self, key: &FastPathKey) -> Result<Option<FastPathFixture>> {
        if let Some(cached) = self.fastreg_cache.borrow().get(key) {
            return Ok(cached.clone());
        }
        let fixture = self
            .store
            .load_fastreg(&key.caller, &key.callee, key.ordinal, &key.hash)?;
        self.fastreg_cache.borrow_mut().insert(key.clone(), fixture.clone());
        Ok(fixture)
    }

    /// Run the body and rewrite the fixture at `key` if one exists
    fn refresh_fast_path(&self, key: FastPathKey, body: &Body, inputs: &Inputs) -> CallResult {
        let before = self.stub_counts.borrow().snapshot(&key.caller);
        let outcome = capture(self.run_nested(body, inputs))?;

        if self
            .store
            .fastreg_exists(&key.caller, &key.callee, key.ordinal, &key.hash)
        {
            let delta = self.stub_counts.borrow().delta(&key.caller, &before)?;
            let fixture = FastPathFixture {
                outcome: outcome.clone(),
                stub_counter_delta: delta,
            };
            self.store
                .save_fastreg(&key.caller, &key.callee, key.ordinal, &key.hash, &fixture)?;
            debug!(callee = %key.callee, caller = %key.caller, ordinal = key.ordinal, "fast-path fixture refreshed");
            self.fastreg_cache.borrow_mut().insert(key, Some(fixture));
        }

        outcome.into_result()
    }
}
