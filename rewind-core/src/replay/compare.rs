//! Outcome comparison

use serde_json::Value;
use std::sync::Arc;

use crate::outcome::{Outcome, Raised};
use crate::store::Serializer;

/// Pluggable equality for replayed outcomes.
///
/// Returning `None` defers to the default rules: direct equality, else equal
/// serialized bytes for values; same kind and message for raised errors.
pub trait EqualityPolicy: Send + Sync {
    /// Compare returned values
    fn values_equal(&self, _actual: &Value, _expected: &Value) -> Option<bool> {
        None
    }

    /// Compare raised errors
    fn raised_equal(&self, _actual: &Raised, _expected: &Raised) -> Option<bool> {
        None
    }
}

/// The default rules only
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultEquality;

impl EqualityPolicy for DefaultEquality {}

/// Adapts a closure over returned values
pub struct ValueEquality<F>(pub F);

impl<F> EqualityPolicy for ValueEquality<F>
where
    F: Fn(&Value, &Value) -> Option<bool> + Send + Sync,
{
    fn values_equal(&self, actual: &Value, expected: &Value) -> Option<bool> {
        (self.0)(actual, expected)
    }
}

/// Result of comparing an actual outcome with the expected one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// Outcomes match
    Match,
    /// One returned and the other raised
    TypeMismatch,
    /// Same type, different content
    ValueMismatch,
}

/// Applies an [`EqualityPolicy`] with the default fallback
#[derive(Clone)]
pub struct Comparator {
    policy: Arc<dyn EqualityPolicy>,
}

impl Default for Comparator {
    fn default() -> Self {
        Self::new(Arc::new(DefaultEquality))
    }
}

impl std::fmt::Debug for Comparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Comparator").finish_non_exhaustive()
    }
}

impl Comparator {
    /// Compare with `policy`
    pub fn new(policy: Arc<dyn EqualityPolicy>) -> Self {
        Self { policy }
    }

    /// Compare `actual` with `expected`
    pub fn compare(&self, serializer: &dyn Serializer, actual: &Outcome, expected: &Outcome) -> Comparison {
        let equal = match (actual, expected) {
            (Outcome::Returned(a), Outcome::Returned(e)) => self
                .policy
                .values_equal(a, e)
                .unwrap_or_else(|| default_values_equal(serializer, a, e)),
            (Outcome::Raised(a), Outcome::Raised(e)) => {
                self.policy.raised_equal(a, e).unwrap_or_else(|| a == e)
            }
            _ => return Comparison::TypeMismatch,
        };
        if equal {
            Comparison::Match
        } else {
            Comparison::ValueMismatch
        }
    }
}

fn default_values_equal(serializer: &dyn Serializer, actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match (serializer.encode(actual), serializer.encode(expected)) {
        (Ok(a), Ok(e)) => a == e,
        _ => false,
    }
}
