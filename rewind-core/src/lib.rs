//! # Rewind - Record/Replay Regression Testing
//!
//! Rewind captures the inputs and outcomes of selected functions while a
//! program runs, then re-executes those functions later and reports whether
//! their behavior changed.
//! - Recorded functions become test cases (inputs, outcome, function token)
//! - Boundary functions (network, clock, database) become stub fixtures
//! - Replay answers boundary calls from fixtures, so cases run offline
//! - Nested recorded calls can be short-circuited with fast-path fixtures
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rewind_core::prelude::*;
//! use std::sync::Arc;
//!
//! fn main() -> rewind_core::Result<()> {
//!     let registry = Registry::new();
//!     let lookup = registry.boundary("lookup", |_, inputs| {
//!         let name: String = inputs.arg(0)?;
//!         Ok(json!(format!("Dr. {name}")))
//!     })?;
//!     let greet = registry.recorded("greet", move |session, inputs| {
//!         let title = lookup.call(session, inputs)?;
//!         Ok(json!(format!("Hi {}", title.as_str().unwrap_or_default())))
//!     })?;
//!
//!     // record one case
//!     let session = Session::builder().record().root(".rewind").build();
//!     greet.call(&session, &Inputs::from_args([json!("World")])).ok();
//!
//!     // replay every case
//!     let runner = ReplayRunner::new(ArtifactStore::new(".rewind"), Arc::new(registry));
//!     let summary = runner.run(&RunOptions::test())?;
//!     assert!(summary.passed());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **Registry**: named recorded and boundary functions, resolved by id
//! - **Session**: call stack, counters and mode for one call tree
//! - **Store**: on-disk case layout, serializers and the integrity ledger
//! - **Replay**: batch runner, comparison and reporting

pub mod config;
pub mod error;
pub mod ids;
pub mod outcome;
pub mod quota;
pub mod registry;
pub mod replay;
pub mod session;
pub mod store;

/// Crate version, stamped into ledger entries
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use error::{Result, RewindError};

/// Re-exports of the most commonly used types
pub mod prelude {
    pub use crate::config::RewindConfig;
    pub use crate::error::{Result, RewindError};
    pub use crate::ids::{CaseIdGenerator, FixedCaseId, RandomCaseIds, SequentialCaseIds};
    pub use crate::outcome::{CallError, CallResult, CaseKey, Inputs, Outcome, Raised};
    pub use crate::quota::{QuotaLimit, QuotaManager};
    pub use crate::registry::{BoundaryFn, FunctionLocator, FunctionToken, OnDuplicate, RecordedFn, Registry};
    pub use crate::replay::{CaseResult, CaseStatus, ReplayRunner, Reporter, RunOptions, RunSummary};
    pub use crate::session::{Mode, Session};
    pub use crate::store::{ArtifactStore, SerializerKind};
    pub use serde_json::json;
}
