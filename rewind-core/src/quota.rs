//! Per-function cap on retained cases

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::Result;
use crate::store::ArtifactStore;

/// Maximum number of retained cases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaLimit {
    /// No cap
    #[default]
    Unbounded,
    /// At most `n` cases
    Max(usize),
}

impl QuotaLimit {
    /// Whether `count` existing cases leave room for one more
    pub fn allows(self, count: usize) -> bool {
        match self {
            QuotaLimit::Unbounded => true,
            QuotaLimit::Max(max) => count < max,
        }
    }
}

impl From<Option<usize>> for QuotaLimit {
    fn from(max: Option<usize>) -> Self {
        max.map_or(QuotaLimit::Unbounded, QuotaLimit::Max)
    }
}

/// Resolves quotas: per-fcid override, else the process-wide default
#[derive(Debug, Default)]
pub struct QuotaManager {
    default: RwLock<QuotaLimit>,
    overrides: RwLock<HashMap<String, QuotaLimit>>,
}

impl QuotaManager {
    /// Unbounded quotas
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with the given default
    pub fn with_default(limit: QuotaLimit) -> Self {
        Self {
            default: RwLock::new(limit),
            overrides: RwLock::new(HashMap::new()),
        }
    }

    /// Change the default; existing overrides keep their value
    pub fn set_default(&self, limit: QuotaLimit) {
        *self.default.write().unwrap_or_else(|p| p.into_inner()) = limit;
    }

    /// Override the quota of one function
    pub fn set_for(&self, fcid: impl Into<String>, limit: QuotaLimit) {
        self.overrides
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(fcid.into(), limit);
    }

    /// Drop every override and reset the default to unbounded
    pub fn reset_all(&self) {
        self.overrides.write().unwrap_or_else(|p| p.into_inner()).clear();
        self.set_default(QuotaLimit::Unbounded);
    }

    /// Effective quota for `fcid`
    pub fn limit_for(&self, fcid: &str) -> QuotaLimit {
        if let Some(limit) = self.overrides.read().unwrap_or_else(|p| p.into_inner()).get(fcid) {
            return *limit;
        }
        *self.default.read().unwrap_or_else(|p| p.into_inner())
    }

    /// Whether one more case may be recorded for `fcid`.
    ///
    /// Counts existing cases on every call; nothing is cached.
    pub fn can_record(&self, fcid: &str, store: &ArtifactStore) -> Result<bool> {
        let limit = self.limit_for(fcid);
        if limit == QuotaLimit::Unbounded {
            return Ok(true);
        }
        Ok(limit.allows(store.count_cases(fcid)?))
    }
}
