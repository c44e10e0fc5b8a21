//! Boundary calls: fixture fan-out when recording, ordinal/hash lookup when replaying

use tracing::debug;

use super::{CallFrame, Session};
use crate::outcome::{CallResult, CaseKey, Inputs, capture};
use crate::registry::Body;

impl Session {
    pub(super) fn record_stub(&self, fcid: &str, body: &Body, inputs: &Inputs) -> CallResult {
        // hash before the body runs; it may mutate state the inputs point at
        let hash = if self.stack.borrow().is_empty() {
            None
        } else {
            Some(self.store.input_hash(inputs)?)
        };

        let result = {
            let _marker = self.push_frame(CallFrame::Boundary);
            body(self, inputs)
        };
        let outcome = capture(result)?;

        if let Some(hash) = hash {
            let callers: Vec<CaseKey> = self.stack.borrow().walk_from_top_until_boundary().cloned().collect();
            for caller in callers {
                let ordinal = self.stub_counts.borrow_mut().next_ordinal(&caller, fcid);
                self.store.save_stub_fixture(&caller, fcid, ordinal, &hash, &outcome)?;
                debug!(stub = fcid, caller = %caller, ordinal, hash = %hash, "stub fixture recorded");
            }
        }

        outcome.into_result()
    }

    pub(super) fn replay_stub(&self, fcid: &str, body: &Body, inputs: &Inputs) -> CallResult {
        let Some(caller) = self.context() else {
            return body(self, inputs);
        };

        let hash = self.store.input_hash(inputs)?;
        let ordinal = self.stub_counts.borrow_mut().next_ordinal(&caller, fcid);
        let outcome = self.store.load_stub_fixture(&caller, fcid, ordinal, &hash)?;
        debug!(stub = fcid, caller = %caller, ordinal, hash = %hash, "stub replayed");

        outcome.into_result()
    }
}
