//! Function registry
//!
//! The `Registry` maps function ids to wrapped bodies:
//! - `recorded` functions are captured as test cases
//! - `boundary` functions are stubbed: recorded once, replayed from fixtures
//!
//! Registration returns a cloneable handle whose `call` routes through a
//! [`Session`]. Handles resolve their body by id on every call, so a
//! re-registration under [`OnDuplicate::Ignore`] relinks existing handles.
//!
//! # Example
//!
//! ```rust,ignore
//! use rewind_core::prelude::*;
//!
//! let registry = Registry::new();
//! let stub = registry.boundary("stub", |_, inputs| {
//!     let x: String = inputs.arg(0)?;
//!     Ok(json!(format!("[{x}]")))
//! })?;
//! let hello = registry.recorded("hello", move |session, inputs| {
//!     let wrapped = stub.call(session, &Inputs::from_args([inputs.args[0].clone()]))?;
//!     Ok(json!(format!("{} {}", wrapped.as_str().unwrap_or_default(), inputs.arg::<String>(1)?)))
//! })?;
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::error::{Result, RewindError};
use crate::outcome::{CallResult, Inputs};
use crate::session::Session;

/// Version of the persisted function token format
pub const TOKEN_SCHEMA_VERSION: u32 = 1;

/// A wrapped function body
pub type Body = Arc<dyn Fn(&Session, &Inputs) -> CallResult + Send + Sync>;

/// Re-registers functions when a lookup misses
pub type DiscoveryHook = Arc<dyn Fn(&Registry) -> Result<()> + Send + Sync>;

/// Registration kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionKind {
    /// Captured as test cases
    Recorded,
    /// Stubbed at the boundary
    Boundary,
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionKind::Recorded => write!(f, "recorded"),
            FunctionKind::Boundary => write!(f, "boundary"),
        }
    }
}

/// Persisted stand-in for a function; resolved back through a [`FunctionLocator`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionToken {
    /// Function id
    pub fcid: String,

    /// Type name of the registered body
    pub name: String,

    /// Registration kind
    pub kind: FunctionKind,

    /// Token format version
    pub schema_version: u32,
}

impl FunctionToken {
    /// Create a token
    pub fn new(fcid: impl Into<String>, name: impl Into<String>, kind: FunctionKind) -> Self {
        Self {
            fcid: fcid.into(),
            name: name.into(),
            kind,
            schema_version: TOKEN_SCHEMA_VERSION,
        }
    }
}

/// What to do when a function id is registered twice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnDuplicate {
    /// Reject the registration
    #[default]
    Raise,
    /// Replace the previous body
    Ignore,
}

struct Entry {
    name: String,
    body: Body,
}

#[derive(Default)]
struct RegistryInner {
    recorded: RwLock<HashMap<String, Entry>>,
    boundary: RwLock<HashMap<String, Entry>>,
    default_on_duplicate: RwLock<OnDuplicate>,
    forced_on_duplicate: RwLock<Option<OnDuplicate>>,
    discovery: RwLock<Vec<DiscoveryHook>>,
}

/// Function registry, cheap to clone
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("recorded", &self.function_ids(FunctionKind::Recorded))
            .field("boundary", &self.function_ids(FunctionKind::Boundary))
            .finish()
    }
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the duplicate policy used when a registration does not name one
    pub fn set_default_on_duplicate(&self, policy: OnDuplicate) {
        *write(&self.inner.default_on_duplicate) = policy;
    }

    /// Restore the default duplicate policy to [`OnDuplicate::Raise`]
    pub fn reset_default_on_duplicate(&self) {
        self.set_default_on_duplicate(OnDuplicate::Raise);
    }

    /// Register a recorded function with the default duplicate policy
    pub fn recorded<F>(&self, fcid: impl Into<String>, body: F) -> Result<RecordedFn>
    where
        F: Fn(&Session, &Inputs) -> CallResult + Send + Sync + 'static,
    {
        self.recorded_with(fcid, None, body)
    }

    /// Register a recorded function with an explicit duplicate policy
    pub fn recorded_with<F>(&self, fcid: impl Into<String>, on_duplicate: Option<OnDuplicate>, body: F) -> Result<RecordedFn>
    where
        F: Fn(&Session, &Inputs) -> CallResult + Send + Sync + 'static,
    {
        let fcid = fcid.into();
        self.insert(FunctionKind::Recorded, &fcid, on_duplicate, std::any::type_name::<F>(), Arc::new(body))?;
        Ok(RecordedFn {
            fcid: fcid.into(),
            registry: self.clone(),
        })
    }

    /// Register a boundary function with the default duplicate policy
    pub fn boundary<F>(&self, fcid: impl Into<String>, body: F) -> Result<BoundaryFn>
    where
        F: Fn(&Session, &Inputs) -> CallResult + Send + Sync + 'static,
    {
        self.boundary_with(fcid, None, body)
    }

    /// Register a boundary function with an explicit duplicate policy
    pub fn boundary_with<F>(&self, fcid: impl Into<String>, on_duplicate: Option<OnDuplicate>, body: F) -> Result<BoundaryFn>
    where
        F: Fn(&Session, &Inputs) -> CallResult + Send + Sync + 'static,
    {
        let fcid = fcid.into();
        self.insert(FunctionKind::Boundary, &fcid, on_duplicate, std::any::type_name::<F>(), Arc::new(body))?;
        Ok(BoundaryFn {
            fcid: fcid.into(),
            registry: self.clone(),
        })
    }

    fn insert(
        &self,
        kind: FunctionKind,
        fcid: &str,
        explicit: Option<OnDuplicate>,
        name: &str,
        body: Body,
    ) -> Result<()> {
        let forced = *read(&self.inner.forced_on_duplicate);
        let default = *read(&self.inner.default_on_duplicate);
        let policy = forced.or(explicit).unwrap_or(default);

        let mut map = write(self.table(kind));
        if map.contains_key(fcid) {
            if policy == OnDuplicate::Raise {
                return Err(RewindError::Registration {
                    fcid: fcid.to_string(),
                    kind: kind.to_string(),
                });
            }
            debug!(fcid, %kind, "relinking function");
        } else {
            debug!(fcid, %kind, "registering function");
        }
        map.insert(
            fcid.to_string(),
            Entry {
                name: name.to_string(),
                body,
            },
        );
        Ok(())
    }

    fn table(&self, kind: FunctionKind) -> &RwLock<HashMap<String, Entry>> {
        match kind {
            FunctionKind::Recorded => &self.inner.recorded,
            FunctionKind::Boundary => &self.inner.boundary,
        }
    }

    fn entry(&self, kind: FunctionKind, fcid: &str) -> Option<(FunctionToken, Body)> {
        read(self.table(kind))
            .get(fcid)
            .map(|e| (FunctionToken::new(fcid, &e.name, kind), Arc::clone(&e.body)))
    }

    /// Whether `fcid` is registered under `kind`
    pub fn contains(&self, kind: FunctionKind, fcid: &str) -> bool {
        read(self.table(kind)).contains_key(fcid)
    }

    /// Registered ids of a kind, sorted
    pub fn function_ids(&self, kind: FunctionKind) -> Vec<String> {
        let mut ids: Vec<String> = read(self.table(kind)).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Handle on a registered recorded function
    pub fn recorded_fn(&self, fcid: &str) -> Option<RecordedFn> {
        self.contains(FunctionKind::Recorded, fcid).then(|| RecordedFn {
            fcid: fcid.into(),
            registry: self.clone(),
        })
    }

    /// Add a hook that re-registers functions during rediscovery
    pub fn add_discovery_hook<F>(&self, hook: F)
    where
        F: Fn(&Registry) -> Result<()> + Send + Sync + 'static,
    {
        write(&self.inner.discovery).push(Arc::new(hook));
    }

    /// Run every discovery hook with duplicate detection forced to `Ignore`
    pub fn rediscover(&self) -> Result<()> {
        let hooks: Vec<DiscoveryHook> = read(&self.inner.discovery).clone();
        if hooks.is_empty() {
            return Ok(());
        }
        debug!(hooks = hooks.len(), "rediscovering functions");

        let previous = write(&self.inner.forced_on_duplicate).replace(OnDuplicate::Ignore);
        let _restore = ForcedPolicyGuard {
            registry: self,
            previous,
        };
        for hook in hooks {
            hook(self)?;
        }
        Ok(())
    }
}

struct ForcedPolicyGuard<'a> {
    registry: &'a Registry,
    previous: Option<OnDuplicate>,
}

impl Drop for ForcedPolicyGuard<'_> {
    fn drop(&mut self) {
        *write(&self.registry.inner.forced_on_duplicate) = self.previous;
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle on a recorded function
#[derive(Clone)]
pub struct RecordedFn {
    fcid: Arc<str>,
    registry: Registry,
}

impl fmt::Debug for RecordedFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RecordedFn").field(&self.fcid).finish()
    }
}

impl RecordedFn {
    /// Function id
    pub fn fcid(&self) -> &str {
        &self.fcid
    }

    /// Persisted token for this function
    pub fn token(&self) -> Result<FunctionToken> {
        Ok(self.resolve()?.0)
    }

    pub(crate) fn resolve(&self) -> Result<(FunctionToken, Body)> {
        self.registry
            .entry(FunctionKind::Recorded, &self.fcid)
            .ok_or_else(|| RewindError::Other(format!("Function {} is not registered as recorded.", self.fcid)))
    }

    /// Call through the session's interception
    pub fn call(&self, session: &Session, inputs: &Inputs) -> CallResult {
        let (token, body) = self.resolve()?;
        session.call_recorded(&token, &body, inputs)
    }
}

/// Handle on a boundary function
#[derive(Clone)]
pub struct BoundaryFn {
    fcid: Arc<str>,
    registry: Registry,
}

impl fmt::Debug for BoundaryFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BoundaryFn").field(&self.fcid).finish()
    }
}

impl BoundaryFn {
    /// Function id
    pub fn fcid(&self) -> &str {
        &self.fcid
    }

    /// Call through the session's interception
    pub fn call(&self, session: &Session, inputs: &Inputs) -> CallResult {
        let (_, body) = self
            .registry
            .entry(FunctionKind::Boundary, &self.fcid)
            .ok_or_else(|| RewindError::Other(format!("Function {} is not registered as boundary.", self.fcid)))?;
        session.call_boundary(&self.fcid, &body, inputs)
    }
}

/// Resolves a runnable handle for a persisted function token
pub trait FunctionLocator: Send + Sync {
    /// Find the recorded function named by `token`
    fn locate(&self, token: &FunctionToken) -> Option<RecordedFn>;
}

impl FunctionLocator for Registry {
    fn locate(&self, token: &FunctionToken) -> Option<RecordedFn> {
        if let Some(found) = self.recorded_fn(&token.fcid) {
            return Some(found);
        }
        if let Err(e) = self.rediscover() {
            tracing::warn!(fcid = %token.fcid, error = %e, "function rediscovery failed");
            return None;
        }
        self.recorded_fn(&token.fcid)
    }
}

#[cfg(test)]
mod registry_tests {
    use super::*;
    use serde_json::json;

    fn noop(_: &Session, _: &Inputs) -> CallResult {
        Ok(json!(null))
    }

    #[test]
    fn test_duplicate_raises_by_default() {
        let registry = Registry::new();
        registry.recorded("hello", noop).unwrap();

        let err = registry.recorded("hello", noop).unwrap_err();
        assert_eq!(err.to_string(), "Function hello is already registered as recorded.");

        // the same id under the other kind is independent
        registry.boundary("hello", noop).unwrap();
        let err = registry.boundary("hello", noop).unwrap_err();
        assert_eq!(err.to_string(), "Function hello is already registered as boundary.");
    }

    #[test]
    fn test_duplicate_policy_resolution() {
        let registry = Registry::new();
        registry.recorded("f", noop).unwrap();
        registry.recorded_with("f", Some(OnDuplicate::Ignore), noop).unwrap();

        registry.set_default_on_duplicate(OnDuplicate::Ignore);
        registry.recorded("f", noop).unwrap();
        assert!(registry.recorded_with("f", Some(OnDuplicate::Raise), noop).is_err());

        registry.reset_default_on_duplicate();
        assert!(registry.recorded("f", noop).is_err());
        assert_eq!(registry.function_ids(FunctionKind::Recorded), vec!["f"]);
    }

    #[test]
    fn test_ignore_relinks_existing_handles() {
        let registry = Registry::new();
        let handle = registry.recorded("f", |_, _| Ok(json!(1))).unwrap();
        registry
            .recorded_with("f", Some(OnDuplicate::Ignore), |_, _| Ok(json!(2)))
            .unwrap();

        let session = Session::builder().disabled().build();
        assert_eq!(handle.call(&session, &Inputs::new()).unwrap(), json!(2));
    }

    #[test]
    fn test_locator_rediscovers_with_ignore() {
        let registry = Registry::new();
        registry.recorded("already", noop).unwrap();
        registry.add_discovery_hook(|r| {
            r.recorded("already", noop)?;
            r.recorded("late", noop)?;
            Ok(())
        });

        let token = FunctionToken::new("late", "late", FunctionKind::Recorded);
        let found = registry.locate(&token).unwrap();
        assert_eq!(found.fcid(), "late");

        // the forced policy does not outlive rediscovery
        assert!(registry.recorded("already", noop).is_err());

        let missing = FunctionToken::new("never", "never", FunctionKind::Recorded);
        assert!(registry.locate(&missing).is_none());
    }

    #[test]
    fn test_token_names_body_type() {
        let registry = Registry::new();
        let handle = registry.recorded("f", noop).unwrap();
        let token = handle.token().unwrap();
        assert_eq!(token.fcid, "f");
        assert_eq!(token.kind, FunctionKind::Recorded);
        assert!(token.name.ends_with("noop"));
    }
}
