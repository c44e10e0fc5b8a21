//! Batch replay of recorded cases
//!
//! This module re-executes every persisted case against the current code to:
//! - Regression testing: detect changes in a function's outcome
//! - Refreshing: overwrite recordings after an intended change
//! - Reporting: one line per case plus a pass/fail summary
//!
//! # Architecture
//!
//! [`ReplayRunner`] enumerates cases from an [`ArtifactStore`](crate::store::ArtifactStore),
//! resolves each function through a [`FunctionLocator`](crate::registry::FunctionLocator)
//! and runs it under a replay [`Session`](crate::session::Session). The
//! replayed outcome is compared with the recording by a [`Comparator`] and
//! classified as a [`CaseStatus`]. A [`Reporter`] prints each result.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rewind_core::prelude::*;
//!
//! # fn main() -> rewind_core::Result<()> {
//! let registry = Registry::new();
//! let store = ArtifactStore::new(".rewind");
//! let runner = ReplayRunner::new(store, Arc::new(registry));
//!
//! let summary = runner.run(&RunOptions::test())?;
//! assert!(summary.passed());
//! # Ok(())
//! # }
//! ```

mod compare;
mod report;
mod runner;

pub use compare::{Comparator, Comparison, DefaultEquality, EqualityPolicy, ValueEquality};
pub use report::{
    CollectingPrinter, DefaultFormatter, MessageFormatter, MessageRecord, Printer, Reporter, StdoutPrinter,
    Stringify, TracingPrinter,
};
pub use runner::{CaseResult, CaseStatus, ReplayRunner, RunOptions, RunSummary};

#[cfg(test)]
mod tests;
