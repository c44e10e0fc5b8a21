//! Batch replay of persisted cases

use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::compare::{Comparator, Comparison, EqualityPolicy};
use super::report::Reporter;
use crate::error::{Result, RewindError};
use crate::outcome::{CallError, CaseKey, Outcome, Raised};
use crate::registry::FunctionLocator;
use crate::session::{Mode, Session};
use crate::store::ArtifactStore;

/// Classification of one replayed case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CaseStatus {
    /// Replayed outcome matches the recording
    Success,
    /// Replayed outcome differs from the recording
    Fail,
    /// Filtered out, not executed
    Skip,
    /// Recording overwritten with the replayed outcome
    Refresh,
    /// Case could not be executed
    Error,
}

impl CaseStatus {
    /// Whether the status counts towards a passing batch
    pub fn is_ok(self) -> bool {
        matches!(self, CaseStatus::Success | CaseStatus::Refresh | CaseStatus::Skip)
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CaseStatus::Success => "SUCCESS",
            CaseStatus::Fail => "FAIL",
            CaseStatus::Skip => "SKIP",
            CaseStatus::Refresh => "REFRESH",
            CaseStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Batch options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Overwrite recorded outcomes instead of comparing
    pub refresh: bool,

    /// Only these function ids, when non-empty
    pub include_functions: Vec<String>,

    /// Never these function ids
    pub exclude_functions: Vec<String>,

    /// Only these case ids, when non-empty
    pub include_cases: Vec<String>,

    /// Never these case ids
    pub exclude_cases: Vec<String>,

    /// Replay nested recorded calls from fast-path fixtures
    pub fast_path: bool,
}

impl RunOptions {
    /// Compare against recordings
    pub fn test() -> Self {
        Self::default()
    }

    /// Overwrite recordings
    pub fn refresh() -> Self {
        Self {
            refresh: true,
            ..Self::default()
        }
    }

    /// Enable the fast path
    pub fn with_fast_path(mut self, enabled: bool) -> Self {
        self.fast_path = enabled;
        self
    }

    /// Whether the filters select `key`
    pub fn selects(&self, key: &CaseKey) -> bool {
        let included = |list: &[String], id: &str| list.is_empty() || list.iter().any(|x| x == id);
        included(&self.include_functions, &key.fcid)
            && included(&self.include_cases, &key.tcid)
            && !self.exclude_functions.contains(&key.fcid)
            && !self.exclude_cases.contains(&key.tcid)
    }
}

/// Result of one case
#[derive(Debug, Clone, PartialEq)]
pub struct CaseResult {
    /// Case key
    pub key: CaseKey,
    /// Classification
    pub status: CaseStatus,
    /// Detail; empty on success
    pub message: String,
    /// Recorded outcome
    pub expected: Option<Outcome>,
    /// Replayed outcome
    pub actual: Option<Outcome>,
    /// Execution time
    pub duration: Duration,
}

impl CaseResult {
    fn new(key: CaseKey, status: CaseStatus, message: impl Into<String>) -> Self {
        Self {
            key,
            status,
            message: message.into(),
            expected: None,
            actual: None,
            duration: Duration::ZERO,
        }
    }

    fn with_outcomes(mut self, expected: Outcome, actual: Outcome) -> Self {
        self.expected = Some(expected);
        self.actual = Some(actual);
        self
    }

    /// Whether the case counts towards a passing batch
    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }
}

/// Aggregated batch result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Per-case results in execution order
    pub results: Vec<CaseResult>,
    /// SUCCESS count
    pub success: usize,
    /// FAIL count
    pub fail: usize,
    /// SKIP count
    pub skip: usize,
    /// REFRESH count
    pub refresh: usize,
    /// ERROR count
    pub error: usize,
}

impl RunSummary {
    /// Count classifications
    pub fn from_results(results: Vec<CaseResult>) -> Self {
        let mut summary = RunSummary::default();
        for r in &results {
            match r.status {
                CaseStatus::Success => summary.success += 1,
                CaseStatus::Fail => summary.fail += 1,
                CaseStatus::Skip => summary.skip += 1,
                CaseStatus::Refresh => summary.refresh += 1,
                CaseStatus::Error => summary.error += 1,
            }
        }
        summary.results = results;
        summary
    }

    /// Number of cases
    pub fn total(&self) -> usize {
        self.results.len()
    }

    /// SUCCESS + REFRESH + SKIP
    pub fn ok(&self) -> usize {
        self.success + self.refresh + self.skip
    }

    /// Whether no case failed or errored
    pub fn passed(&self) -> bool {
        self.ok() == self.total()
    }

    /// `Passed (ok/total)` or `Failed (ok/total)`
    pub fn summary_line(&self) -> String {
        let verdict = if self.passed() { "Passed" } else { "Failed" };
        format!("{} ({}/{})", verdict, self.ok(), self.total())
    }
}

/// Replays every case in a store
#[derive(Clone)]
pub struct ReplayRunner {
    store: ArtifactStore,
    locator: Arc<dyn FunctionLocator>,
    comparator: Comparator,
    reporter: Reporter,
}

impl fmt::Debug for ReplayRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayRunner")
            .field("root", &self.store.root())
            .finish_non_exhaustive()
    }
}

impl ReplayRunner {
    /// Runner over `store`, resolving functions through `locator`
    pub fn new(store: ArtifactStore, locator: Arc<dyn FunctionLocator>) -> Self {
        Self {
            store,
            locator,
            comparator: Comparator::default(),
            reporter: Reporter::default(),
        }
    }

    /// Use a custom equality policy
    pub fn with_equality(mut self, policy: Arc<dyn EqualityPolicy>) -> Self {
        self.comparator = Comparator::new(policy);
        self
    }

    /// Use a custom reporter
    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Artifact store
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    fn session(&self, options: &RunOptions) -> Session {
        Session::builder()
            .store(self.store.clone())
            .replay()
            .fast_path(options.fast_path)
            .build()
    }

    /// Replay every case in sorted `(fcid, tcid)` order with one session
    pub fn run(&self, options: &RunOptions) -> Result<RunSummary> {
        let session = self.session(options);
        self.run_with_session(&session, options)
    }

    /// Replay every case with a caller-provided session
    pub fn run_with_session(&self, session: &Session, options: &RunOptions) -> Result<RunSummary> {
        let _mode = session.enter_mode(Mode::Replay);
        session.clear();

        let keys = self.store.list_all_cases()?;
        info!(cases = keys.len(), refresh = options.refresh, fast_path = session.fast_path(), "replay started");

        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            let result = self.run_case(session, &key, options);
            self.reporter.case(&result);
            results.push(result);
        }
        Ok(self.finish(results))
    }

    /// Replay every case on blocking workers, one session per case.
    ///
    /// Results are reported in sorted `(fcid, tcid)` order once all cases finish.
    pub async fn run_partitioned(&self, options: &RunOptions) -> Result<RunSummary> {
        let keys = self.store.list_all_cases()?;
        info!(cases = keys.len(), refresh = options.refresh, "partitioned replay started");

        let mut handles = Vec::with_capacity(keys.len());
        for key in &keys {
            let runner = self.clone();
            let options = options.clone();
            let key = key.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                let session = runner.session(&options);
                runner.run_case(&session, &key, &options)
            }));
        }

        let mut results = Vec::with_capacity(keys.len());
        for (key, handle) in keys.into_iter().zip(handles) {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => CaseResult::new(key, CaseStatus::Error, format!("worker failed: {e}")),
            };
            self.reporter.case(&result);
            results.push(result);
        }
        Ok(self.finish(results))
    }

    fn finish(&self, results: Vec<CaseResult>) -> RunSummary {
        let summary = RunSummary::from_results(results);
        info!(
            success = summary.success,
            fail = summary.fail,
            skip = summary.skip,
            refresh = summary.refresh,
            error = summary.error,
            "replay finished"
        );
        self.reporter.summary(&summary);
        summary
    }

    /// Replay a single case
    pub fn run_case(&self, session: &Session, key: &CaseKey, options: &RunOptions) -> CaseResult {
        let start = Instant::now();
        let mut result = self.classify(session, key, options);
        result.duration = start.elapsed();
        debug!(case = %key, status = %result.status, "case classified");
        result
    }

    /// Overwrite the recorded outcome and re-baseline the ledger entry
    fn refresh_case(&self, key: &CaseKey, actual: &Outcome) -> Result<()> {
        self.store.save_outcome(key, actual)?;
        let entry = self.store.ledger().record(key, &self.store.case_dir(key))?;
        debug!(case = %key, hash = %entry.hash, "case refreshed");
        Ok(())
    }

    fn classify(&self, session: &Session, key: &CaseKey, options: &RunOptions) -> CaseResult {
        if !options.selects(key) {
            return CaseResult::new(key.clone(), CaseStatus::Skip, "");
        }

        let loaded = self
            .store
            .load_inputs(key)
            .and_then(|inputs| Ok((inputs, self.store.load_outcome(key)?, self.store.load_token(key)?)));
        let (inputs, expected, token) = match loaded {
            Ok(loaded) => loaded,
            Err(e) => return CaseResult::new(key.clone(), CaseStatus::Error, e.to_string()),
        };
        if token.fcid != key.fcid {
            return CaseResult::new(
                key.clone(),
                CaseStatus::Error,
                format!("Func file names function {} instead of {}.", token.fcid, key.fcid),
            );
        }
        let Some(function) = self.locator.locate(&token) else {
            return CaseResult::new(
                key.clone(),
                CaseStatus::Error,
                format!("Function {} could not be located.", key.fcid),
            );
        };

        let _refresh = session.enter_refresh(options.refresh);
        let replayed = std::panic::catch_unwind(AssertUnwindSafe(|| session.replay_case(&function, key, &inputs)));
        let actual = match replayed {
            Ok(Ok(value)) => Outcome::Returned(value),
            Ok(Err(CallError::Raised(raised))) => Outcome::Raised(raised),
            // refresh never persists a missing fixture as an outcome
            Ok(Err(CallError::Engine(e @ RewindError::FixtureNotFound(_)))) if !options.refresh => {
                Outcome::Raised(Raised::from(&e))
            }
            Ok(Err(CallError::Engine(e))) => {
                return CaseResult::new(key.clone(), CaseStatus::Error, e.to_string());
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(case = %key, %message, "replayed function panicked");
                return CaseResult::new(key.clone(), CaseStatus::Error, format!("panicked: {message}"));
            }
        };

        if options.refresh {
            return match self.refresh_case(key, &actual) {
                Ok(()) => CaseResult::new(key.clone(), CaseStatus::Refresh, "").with_outcomes(expected, actual),
                Err(e) => CaseResult::new(key.clone(), CaseStatus::Error, e.to_string()),
            };
        }

        let (status, message) = match self.comparator.compare(self.store.serializer(), &actual, &expected) {
            Comparison::Match => (CaseStatus::Success, String::new()),
            Comparison::TypeMismatch => (
                CaseStatus::Fail,
                format!(
                    "Output type mismatch: {} != {}",
                    actual.type_label(),
                    expected.type_label()
                ),
            ),
            Comparison::ValueMismatch => (CaseStatus::Fail, "Outputs not matched.".to_string()),
        };
        CaseResult::new(key.clone(), status, message).with_outcomes(expected, actual)
    }
}
