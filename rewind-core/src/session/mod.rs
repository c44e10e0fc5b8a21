//! Interception session
//!
//! A [`Session`] owns all mutable engine state: the call stack, stub and
//! fast-path counters, the fast-path cache and the ambient replay context.
//! Every wrapped call receives the session by reference, so nothing is
//! process-global and independent sessions never observe each other.
//!
//! A session executes one call tree at a time. It is `Send` but not `Sync`;
//! concurrent batches use one session per case (see
//! [`crate::replay::ReplayRunner::run_partitioned`]).
//!
//! # Modes
//!
//! - [`Mode::Disabled`]: bodies run directly
//! - [`Mode::Record`]: recorded functions become cases, boundary calls become stub fixtures
//! - [`Mode::Replay`]: boundary calls are answered from fixtures under the bound case

mod case;
mod counter;
mod fastreg;
mod stack;
mod stub;


pub use counter::{CounterState, Counts};
pub use fastreg::{FastPathCache, FastPathKey};
pub use stack::{CallFrame, CallStack};

use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::config::RewindConfig;
use crate::error::{Result, RewindError};
use crate::ids::{CaseIdGenerator, RandomCaseIds};
use crate::outcome::{CallResult, CaseKey, Inputs};
use crate::quota::QuotaManager;
use crate::registry::{Body, FunctionToken, RecordedFn};
use crate::store::ArtifactStore;

/// Environment variable selecting the mode of sessions built from the environment
pub const MODE_ENV: &str = "REWIND_MODE";

/// Interception mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Run bodies directly
    #[default]
    #[serde(alias = "disable", alias = "off")]
    Disabled,
    /// Capture cases and stub fixtures
    #[serde(alias = "case")]
    Record,
    /// Answer boundary calls from fixtures
    #[serde(alias = "test")]
    Replay,
}

impl Mode {
    /// Read the mode from `REWIND_MODE`; `None` when unset
    pub fn from_env() -> Result<Option<Self>> {
        match std::env::var(MODE_ENV) {
            Ok(value) => value.parse().map(Some),
            Err(_) => Ok(None),
        }
    }
}

impl FromStr for Mode {
    type Err = RewindError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "disabled" | "disable" | "off" => Ok(Mode::Disabled),
            "record" | "case" => Ok(Mode::Record),
            "replay" | "test" => Ok(Mode::Replay),
            _ => Err(RewindError::Configuration(format!("Invalid {MODE_ENV} value: {s}"))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Disabled => write!(f, "disabled"),
            Mode::Record => write!(f, "record"),
            Mode::Replay => write!(f, "replay"),
        }
    }
}

/// Engine state for one logical run
pub struct Session {
    mode: Cell<Mode>,
    fast_path: Cell<bool>,
    refreshing: Cell<bool>,
    store: ArtifactStore,
    quota: Arc<QuotaManager>,
    ids: Arc<dyn CaseIdGenerator>,
    stack: RefCell<CallStack>,
    context: RefCell<Option<CaseKey>>,
    replay_depth: Cell<usize>,
    stub_counts: RefCell<CounterState>,
    fastreg_counts: RefCell<CounterState>,
    fastreg_cache: RefCell<FastPathCache>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("mode", &self.mode.get())
            .field("fast_path", &self.fast_path.get())
            .field("root", &self.store.root())
            .field("depth", &self.stack.borrow().len())
            .field("context", &self.context.borrow())
            .finish()
    }
}

impl Session {
    /// Start building a session
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    /// Session described by a configuration
    pub fn from_config(config: &RewindConfig) -> Self {
        Self::builder().config(config).build()
    }

    /// Current mode
    pub fn mode(&self) -> Mode {
        self.mode.get()
    }

    /// Change the mode
    pub fn set_mode(&self, mode: Mode) {
        self.mode.set(mode);
    }

    /// Switch mode until the guard is dropped
    pub fn enter_mode(&self, mode: Mode) -> ModeGuard<'_> {
        let previous = self.mode.replace(mode);
        ModeGuard { session: self, previous }
    }

    /// Whether fast-path replay is enabled
    pub fn fast_path(&self) -> bool {
        self.fast_path.get()
    }

    /// Enable or disable fast-path replay
    pub fn set_fast_path(&self, enabled: bool) {
        self.fast_path.set(enabled);
    }

    /// Whether replay is refreshing fixtures
    pub fn is_refreshing(&self) -> bool {
        self.refreshing.get()
    }

    pub(crate) fn enter_refresh(&self, refreshing: bool) -> RefreshGuard<'_> {
        let previous = self.refreshing.replace(refreshing);
        RefreshGuard { session: self, previous }
    }

    /// Artifact store
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Quota manager
    pub fn quota(&self) -> &Arc<QuotaManager> {
        &self.quota
    }

    /// Case bound for replay, if any
    pub fn context(&self) -> Option<CaseKey> {
        self.context.borrow().clone()
    }

    /// Number of active frames
    pub fn stack_depth(&self) -> usize {
        self.stack.borrow().len()
    }

    /// Stub invocations counted under `caller`
    pub fn stub_counts(&self, caller: &CaseKey) -> Counts {
        self.stub_counts.borrow().snapshot(caller)
    }

    /// Reset counters, caches, stack and context
    pub fn clear(&self) {
        self.stack.borrow_mut().clear();
        self.context.borrow_mut().take();
        self.replay_depth.set(0);
        self.stub_counts.borrow_mut().clear();
        self.fastreg_counts.borrow_mut().clear();
        self.fastreg_cache.borrow_mut().clear();
        debug!("session state cleared");
    }

    /// Route a recorded-function call according to the mode
    pub(crate) fn call_recorded(&self, token: &FunctionToken, body: &Body, inputs: &Inputs) -> CallResult {
        match self.mode.get() {
            Mode::Disabled => body(self, inputs),
            Mode::Record => self.record_case(token, body, inputs),
            Mode::Replay => self.replay_recorded(token, body, inputs),
        }
    }

    /// Route a boundary call according to the mode
    pub(crate) fn call_boundary(&self, fcid: &str, body: &Body, inputs: &Inputs) -> CallResult {
        match self.mode.get() {
            Mode::Disabled => body(self, inputs),
            Mode::Record => self.record_stub(fcid, body, inputs),
            Mode::Replay => self.replay_stub(fcid, body, inputs),
        }
    }

    /// Re-execute a recorded case with its fixtures.
    ///
    /// Runs the function body in replay mode with `key` bound as the ambient
    /// context. Boundary calls inside are answered from the case's stub
    /// fixtures; nested recorded calls run as ordinary calls or, with the fast
    /// path enabled, from fast-path fixtures.
    pub fn replay_case(&self, function: &RecordedFn, key: &CaseKey, inputs: &Inputs) -> CallResult {
        let (_, body) = function.resolve()?;
        let _mode = self.enter_mode(Mode::Replay);
        let _context = self.bind_context(key.clone());
        debug!(case = %key, "replaying case");
        body(self, inputs)
    }

    fn bind_context(&self, key: CaseKey) -> ContextGuard<'_> {
        let previous = self.context.borrow_mut().replace(key);
        let depth = self.replay_depth.replace(0);
        ContextGuard {
            session: self,
            previous,
            depth,
        }
    }

    fn push_frame(&self, frame: CallFrame) -> FrameGuard<'_> {
        self.stack.borrow_mut().push(frame);
        FrameGuard { session: self }
    }

    /// Run a body one level deeper in the replayed call tree
    fn run_nested(&self, body: &Body, inputs: &Inputs) -> CallResult {
        self.replay_depth.set(self.replay_depth.get() + 1);
        let _depth = DepthGuard { session: self };
        body(self, inputs)
    }
}

/// Restores the previous mode on drop
pub struct ModeGuard<'a> {
    session: &'a Session,
    previous: Mode,
}

impl Drop for ModeGuard<'_> {
    fn drop(&mut self) {
        self.session.mode.set(self.previous);
    }
}

pub(crate) struct RefreshGuard<'a> {
    session: &'a Session,
    previous: bool,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.session.refreshing.set(self.previous);
    }
}

struct ContextGuard<'a> {
    session: &'a Session,
    previous: Option<CaseKey>,
    depth: usize,
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        *self.session.context.borrow_mut() = self.previous.take();
        self.session.replay_depth.set(self.depth);
    }
}

struct FrameGuard<'a> {
    session: &'a Session,
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.session.stack.borrow_mut().pop();
    }
}

struct DepthGuard<'a> {
    session: &'a Session,
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        let depth = self.session.replay_depth.get();
        self.session.replay_depth.set(depth.saturating_sub(1));
    }
}

/// Builder for [`Session`]
#[derive(Default)]
pub struct SessionBuilder {
    mode: Mode,
    fast_path: bool,
    store: Option<ArtifactStore>,
    quota: Option<Arc<QuotaManager>>,
    ids: Option<Arc<dyn CaseIdGenerator>>,
}

impl SessionBuilder {
    /// Take mode, fast path, store and quota from a configuration
    pub fn config(mut self, config: &RewindConfig) -> Self {
        self.mode = config.mode;
        self.fast_path = config.fast_path;
        self.store = Some(config.store());
        self.quota = Some(config.quota_manager());
        self
    }

    /// Set the mode
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Shorthand for [`Mode::Disabled`]
    pub fn disabled(self) -> Self {
        self.mode(Mode::Disabled)
    }

    /// Shorthand for [`Mode::Record`]
    pub fn record(self) -> Self {
        self.mode(Mode::Record)
    }

    /// Shorthand for [`Mode::Replay`]
    pub fn replay(self) -> Self {
        self.mode(Mode::Replay)
    }

    /// Enable or disable fast-path replay
    pub fn fast_path(mut self, enabled: bool) -> Self {
        self.fast_path = enabled;
        self
    }

    /// Use `store` for artifacts
    pub fn store(mut self, store: ArtifactStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Shorthand for a JSON store at `root`
    pub fn root(self, root: impl Into<std::path::PathBuf>) -> Self {
        self.store(ArtifactStore::new(root))
    }

    /// Share a quota manager
    pub fn quota(mut self, quota: Arc<QuotaManager>) -> Self {
        self.quota = Some(quota);
        self
    }

    /// Use a case id generator
    pub fn ids(mut self, ids: impl CaseIdGenerator + 'static) -> Self {
        self.ids = Some(Arc::new(ids));
        self
    }

    /// Share a case id generator
    pub fn shared_ids(mut self, ids: Arc<dyn CaseIdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Build the session
    pub fn build(self) -> Session {
        let defaults = RewindConfig::default();
        Session {
            mode: Cell::new(self.mode),
            fast_path: Cell::new(self.fast_path),
            refreshing: Cell::new(false),
            store: self.store.unwrap_or_else(|| defaults.store()),
            quota: self.quota.unwrap_or_default(),
            ids: self.ids.unwrap_or_else(|| Arc::new(RandomCaseIds)),
            stack: RefCell::new(CallStack::new()),
            context: RefCell::new(None),
            replay_depth: Cell::new(0),
            stub_counts: RefCell::new(CounterState::new()),
            fastreg_counts: RefCell::new(CounterState::new()),
            fastreg_cache: RefCell::new(FastPathCache::default()),
        }
    }
}
