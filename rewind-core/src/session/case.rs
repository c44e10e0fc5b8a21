//! Recording of recorded-function calls as cases

use std::path::PathBuf;
use tracing::{debug, warn};

use super::{CallFrame, Session};
use crate::error::RewindError;
use crate::outcome::{CallResult, CaseKey, Inputs, capture};
use crate::registry::{Body, FunctionToken};
use crate::store::{ArtifactStore, FastPathFixture};

const MAX_ID_ATTEMPTS: usize = 16;

/// Deletes a partially recorded case unless committed
struct Rollback<'a> {
    store: &'a ArtifactStore,
    key: CaseKey,
    extra: Vec<PathBuf>,
    committed: bool,
}

impl<'a> Rollback<'a> {
    fn new(store: &'a ArtifactStore, key: CaseKey) -> Self {
        Self {
            store,
            key,
            extra: Vec::new(),
            committed: false,
        }
    }

    fn track(&mut self, paths: Vec<PathBuf>) {
        self.extra.extend(paths);
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Rollback<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(e) = self.store.remove_case(&self.key) {
            warn!(case = %self.key, error = %e, "failed to remove partial case");
        }
        for path in &self.extra {
            if let Err(e) = std::fs::remove_file(path)
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(path = %path.display(), error = %e, "failed to remove fast-path fixture");
            }
        }
        debug!(case = %self.key, "recording rolled back");
    }
}

impl Session {
    pub(super) fn record_case(&self, token: &FunctionToken, body: &Body, inputs: &Inputs) -> CallResult {
        let fcid = token.fcid.as_str();
        if !self.quota.can_record(fcid, &self.store)? {
            warn!(fcid, "case quota reached, calling without recording");
            return body(self, inputs);
        }

        let key = self.allocate_case_key(fcid)?;
        self.store.remove_case(&key)?;
        self.stub_counts.borrow_mut().reset(&key);
        self.fastreg_counts.borrow_mut().reset(&key);
        let rollback = Rollback::new(&self.store, key.clone());

        self.store.save_inputs(&key, inputs)?;
        self.store.save_token(&key, token)?;

        let frame = self.push_frame(CallFrame::Recorded(key.clone()));
        let caller = self
            .stack
            .borrow()
            .current_caller_frame()
            .and_then(CallFrame::case)
            .cloned();
        let fast_path = match caller {
            Some(caller) => {
                let before = self.stub_counts.borrow().snapshot(&caller);
                let hash = self.store.input_hash(inputs)?;
                Some((caller, before, hash))
            }
            None => None,
        };
        debug!(case = %key, nested = fast_path.is_some(), "recording case");

        let outcome = capture(body(self, inputs))?;
        self.finish_case(&key, outcome.clone(), fast_path, rollback)?;
        drop(frame);

        outcome.into_result()
    }

    /// Draw a case id that is neither active nor, unless the generator
    /// overwrites, already on disk
    fn allocate_case_key(&self, fcid: &str) -> crate::error::Result<CaseKey> {
        let mut key = CaseKey::new(fcid, self.ids.next_id());
        let overwrites = self.ids.overwrites_existing();
        for _ in 0..MAX_ID_ATTEMPTS {
            let active = self.stack.borrow().contains_case(&key);
            if !active && (overwrites || !self.store.case_dir(&key).exists()) {
                return Ok(key);
            }
            if overwrites {
                break;
            }
            debug!(case = %key, active, "case id taken, drawing another");
            key = CaseKey::new(fcid, self.ids.next_id());
        }
        Err(RewindError::CaseIdCollision {
            fcid: key.fcid,
            tcid: key.tcid,
        })
    }

    fn finish_case(
        &self,
        key: &CaseKey,
        outcome: crate::outcome::Outcome,
        fast_path: Option<(CaseKey, super::Counts, String)>,
        mut rollback: Rollback<'_>,
    ) -> crate::error::Result<()> {
        self.store.save_outcome(key, &outcome)?;

        if let Some((caller, before, hash)) = fast_path {
            let delta = self.stub_counts.borrow().delta(&caller, &before)?;
            let ordinal = self.fastreg_counts.borrow_mut().next_ordinal(&caller, &key.fcid);
            let fixture = FastPathFixture {
                outcome,
                stub_counter_delta: delta,
            };
            let written = self.store.save_fastreg(&caller, &key.fcid, ordinal, &hash, &fixture)?;
            rollback.track(written);
            debug!(case = %key, caller = %caller, ordinal, "fast-path fixture recorded");
        }

        let entry = self.store.ledger().record(key, &self.store.case_dir(key))?;
        debug!(case = %key, hash = %entry.hash, size = entry.size, "case recorded");
        rollback.commit();
        Ok(())
    }
}
