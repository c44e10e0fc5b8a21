//! Error types for rewind operations

use std::path::PathBuf;

use crate::store::SerializeError;

/// Result type for rewind operations
pub type Result<T> = std::result::Result<T, RewindError>;

/// Error types for the record/replay engine
#[derive(Debug, thiserror::Error)]
pub enum RewindError {
    /// A function id was registered twice under the same kind
    #[error("Function {fcid} is already registered as {kind}.")]
    Registration {
        /// Conflicting function id
        fcid: String,
        /// Registration kind ("recorded" or "boundary")
        kind: String,
    },

    /// A stub fixture expected during replay does not exist
    #[error("Fixture not found: {}", .0.display())]
    FixtureNotFound(PathBuf),

    /// One of the case artifacts is missing
    #[error("{artifact} file {} not found.", path.display())]
    MissingArtifact {
        /// Artifact name (inputs, outputs, func)
        artifact: &'static str,
        /// Expected path
        path: PathBuf,
    },

    /// Serializer failed and the failure policy says raise
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializeError),

    /// A counter went backwards while a recorded call was running
    #[error("Counter corrupted for {stub} under {fcid}/{tcid}: count decreased from {before} to {after}")]
    CounterCorruption {
        /// Caller function id
        fcid: String,
        /// Caller case id
        tcid: String,
        /// Stub function id
        stub: String,
        /// Count before the call
        before: u64,
        /// Count after the call
        after: u64,
    },

    /// The id generator produced a case id that is still being recorded
    #[error("Case id {tcid} is already active for function {fcid}")]
    CaseIdCollision {
        /// Function id
        fcid: String,
        /// Colliding case id
        tcid: String,
    },

    /// Read-back of a freshly written artifact did not match what was written
    #[error("Artifact {} does not survive a serializer round-trip", .0.display())]
    VerifyMismatch(PathBuf),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl RewindError {
    /// Stable name of the error variant, used when an engine error is surfaced as a raised outcome
    pub fn kind_name(&self) -> &'static str {
        match self {
            RewindError::Registration { .. } => "rewind::Registration",
            RewindError::FixtureNotFound(_) => "rewind::FixtureNotFound",
            RewindError::MissingArtifact { .. } => "rewind::MissingArtifact",
            RewindError::Serialization(_) => "rewind::Serialization",
            RewindError::CounterCorruption { .. } => "rewind::CounterCorruption",
            RewindError::CaseIdCollision { .. } => "rewind::CaseIdCollision",
            RewindError::VerifyMismatch(_) => "rewind::VerifyMismatch",
            RewindError::Configuration(_) => "rewind::Configuration",
            RewindError::Json(_) => "rewind::Json",
            RewindError::Io(_) => "rewind::Io",
            RewindError::Other(_) => "rewind::Other",
        }
    }
}

impl From<String> for RewindError {
    fn from(s: String) -> Self {
        RewindError::Other(s)
    }
}

impl From<&str> for RewindError {
    fn from(s: &str) -> Self {
        RewindError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for RewindError {
    fn from(err: anyhow::Error) -> Self {
        RewindError::Other(err.to_string())
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn test_registration_message() {
        let err = RewindError::Registration {
            fcid: "hello".to_string(),
            kind: "recorded".to_string(),
        };
        assert_eq!(err.to_string(), "Function hello is already registered as recorded.");
    }

    #[test]
    fn test_kind_name() {
        let err = RewindError::FixtureNotFound(PathBuf::from("/tmp/x"));
        assert_eq!(err.kind_name(), "rewind::FixtureNotFound");
        assert!(err.to_string().contains("/tmp/x"));
    }
}
