//! Call inputs, captured outcomes and the error channel of wrapped bodies
//!
//! Every intercepted call receives an [`Inputs`] and produces either a value or a
//! [`CallError`]. The engine captures the result uniformly as an [`Outcome`] so that
//! recording and replay never special-case errors versus normal returns.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::RewindError;

/// Result of a wrapped body
pub type CallResult = std::result::Result<Value, CallError>;

/// Arguments of an intercepted call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Inputs {
    /// Bound object for method-like calls; persisted but never hashed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<Value>,

    /// Positional arguments
    #[serde(default)]
    pub args: Vec<Value>,

    /// Keyword arguments
    #[serde(default)]
    pub kwargs: BTreeMap<String, Value>,
}

impl Inputs {
    /// Create empty inputs
    pub fn new() -> Self {
        Self::default()
    }

    /// Create inputs from positional values
    pub fn from_args(args: impl IntoIterator<Item = Value>) -> Self {
        Self {
            receiver: None,
            args: args.into_iter().collect(),
            kwargs: BTreeMap::new(),
        }
    }

    /// Append a positional argument
    pub fn with_arg(mut self, value: impl Serialize) -> Result<Self, CallError> {
        self.args.push(to_value(value)?);
        Ok(self)
    }

    /// Set a keyword argument
    pub fn with_kwarg(mut self, name: impl Into<String>, value: impl Serialize) -> Result<Self, CallError> {
        self.kwargs.insert(name.into(), to_value(value)?);
        Ok(self)
    }

    /// Set the receiver
    pub fn with_receiver(mut self, receiver: impl Serialize) -> Result<Self, CallError> {
        self.receiver = Some(to_value(receiver)?);
        Ok(self)
    }

    /// Read a positional argument as `T`
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T, CallError> {
        let value = self.args.get(index).ok_or_else(|| {
            CallError::raised("ArgumentError", format!("missing positional argument {}", index))
        })?;
        from_value(value.clone())
    }

    /// Read a keyword argument as `T`
    pub fn kwarg<T: DeserializeOwned>(&self, name: &str) -> Result<T, CallError> {
        let value = self.kwargs.get(name).ok_or_else(|| {
            CallError::raised("ArgumentError", format!("missing keyword argument '{}'", name))
        })?;
        from_value(value.clone())
    }

    /// Read the receiver as `T`
    pub fn receiver<T: DeserializeOwned>(&self) -> Result<T, CallError> {
        let value = self
            .receiver
            .as_ref()
            .ok_or_else(|| CallError::raised("ArgumentError", "call has no receiver"))?;
        from_value(value.clone())
    }

    /// The hashed part of the inputs (receiver excluded)
    pub fn effective(&self) -> Value {
        serde_json::json!({
            "args": self.args,
            "kwargs": self.kwargs,
        })
    }
}

fn to_value(value: impl Serialize) -> Result<Value, CallError> {
    serde_json::to_value(value).map_err(|e| CallError::raised("ArgumentError", e.to_string()))
}

fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, CallError> {
    serde_json::from_value(value).map_err(|e| CallError::raised("TypeError", e.to_string()))
}

/// A domain error raised by a wrapped body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Raised {
    /// Error type name
    pub kind: String,

    /// String form of the error
    pub message: String,
}

impl Raised {
    /// Create a raised error
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Raised {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Raised {}

impl From<&RewindError> for Raised {
    fn from(err: &RewindError) -> Self {
        Raised::new(err.kind_name(), err.to_string())
    }
}

/// Failure of a wrapped body
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// Domain error produced by user code, captured into outcomes
    #[error("{0}")]
    Raised(Raised),

    /// Engine failure, never captured as an expected outcome
    #[error(transparent)]
    Engine(#[from] RewindError),
}

impl CallError {
    /// Shorthand for a raised domain error
    pub fn raised(kind: impl Into<String>, message: impl Into<String>) -> Self {
        CallError::Raised(Raised::new(kind, message))
    }

    /// Get the raised error, if this is one
    pub fn as_raised(&self) -> Option<&Raised> {
        match self {
            CallError::Raised(r) => Some(r),
            CallError::Engine(_) => None,
        }
    }
}

impl From<Raised> for CallError {
    fn from(r: Raised) -> Self {
        CallError::Raised(r)
    }
}

/// Captured result of a call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Outcome {
    /// The body returned a value
    Returned(Value),

    /// The body raised an error
    Raised(Raised),
}

impl Outcome {
    /// Short label used in reports
    pub fn type_label(&self) -> &'static str {
        match self {
            Outcome::Returned(_) => "return",
            Outcome::Raised(_) => "raise",
        }
    }

    /// Whether this outcome is a raised error
    pub fn is_raised(&self) -> bool {
        matches!(self, Outcome::Raised(_))
    }

    /// Re-raise or return the outcome at the call boundary
    pub fn into_result(self) -> CallResult {
        match self {
            Outcome::Returned(v) => Ok(v),
            Outcome::Raised(r) => Err(CallError::Raised(r)),
        }
    }
}

/// Identity of one recorded invocation: `(fcid, tcid)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CaseKey {
    /// Function id
    pub fcid: String,

    /// Case id
    pub tcid: String,
}

impl CaseKey {
    /// Create a case key
    pub fn new(fcid: impl Into<String>, tcid: impl Into<String>) -> Self {
        Self {
            fcid: fcid.into(),
            tcid: tcid.into(),
        }
    }
}

impl fmt::Display for CaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.fcid, self.tcid)
    }
}

/// Split a body result into a captured outcome or an engine error
pub(crate) fn capture(result: CallResult) -> Result<Outcome, RewindError> {
    match result {
        Ok(v) => Ok(Outcome::Returned(v)),
        Err(CallError::Raised(r)) => Ok(Outcome::Raised(r)),
        Err(CallError::Engine(e)) => Err(e),
    }
}
