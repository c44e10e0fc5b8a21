//! Artifact store
//!
//! Persists cases, stub fixtures and fast-path fixtures under a root directory:
//!
//! ```text
//! {root}/{fcid}/{tcid}/inputs
//! {root}/{fcid}/{tcid}/outputs
//! {root}/{fcid}/{tcid}/func
//! {root}/{fcid}/{tcid}/stub/{stubFcid}.{ordinal}.{inputHash}.output
//! {root}/{fcid}/{tcid}/fastreg/{fcid}.{ordinal}.{inputHash}.output
//! {root}/{fcid}/{tcid}/fastreg/{fcid}.{ordinal}.{inputHash}.stub_counter
//! {root}/meta.json
//! ```
//!
//! Payloads go through a pluggable [`Serializer`]. Encoding failures are
//! handled per [`SerializeErrorRules`]: an ignored or warned failure skips the
//! artifact, a raised one is returned as [`RewindError::Serialization`].

pub mod layout;
pub mod ledger;
pub mod serializer;

pub use layout::Layout;
pub use ledger::{Ledger, LedgerCheck, LedgerEntry, LedgerStatus};
pub use serializer::{
    JsonSerializer, SerializeError, SerializeErrorAction, SerializeErrorRule, SerializeErrorRules,
    Serializer, SerializerKind, YamlSerializer, input_hash,
};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Result, RewindError};
use crate::outcome::{CaseKey, Inputs, Outcome};
use crate::registry::FunctionToken;

/// Net effect of a recorded subtree, replayed by the fast path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FastPathFixture {
    /// Outcome of the recorded call
    pub outcome: Outcome,

    /// Stub invocations made during the call, per stub fcid
    pub stub_counter_delta: BTreeMap<String, u64>,
}

/// Filesystem-backed fixture store
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    layout: Layout,
    serializer: Arc<dyn Serializer>,
    error_rules: SerializeErrorRules,
    verify_on_record: bool,
}

impl ArtifactStore {
    /// Create a JSON store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            layout: Layout::new(root),
            serializer: Arc::new(JsonSerializer),
            error_rules: SerializeErrorRules::default(),
            verify_on_record: false,
        }
    }

    /// Use a different serializer
    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Set the serialization-failure policy
    pub fn with_error_rules(mut self, rules: SerializeErrorRules) -> Self {
        self.error_rules = rules;
        self
    }

    /// Read back and compare every outcome after writing it
    pub fn with_verify_on_record(mut self, verify: bool) -> Self {
        self.verify_on_record = verify;
        self
    }

    /// Path layout
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Store root
    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    /// Active serializer
    pub fn serializer(&self) -> &dyn Serializer {
        self.serializer.as_ref()
    }

    /// Metadata ledger of this store
    pub fn ledger(&self) -> Ledger {
        Ledger::new(self.layout.ledger())
    }

    /// Whether outcomes are verified after writing
    pub fn verifies_on_record(&self) -> bool {
        self.verify_on_record
    }

    /// Input hash of a call under this store's serializer
    pub fn input_hash(&self, inputs: &Inputs) -> Result<String> {
        Ok(input_hash(self.serializer.as_ref(), inputs)?)
    }

    // ------------------------------------------------------------------
    // Raw payloads
    // ------------------------------------------------------------------

    /// Encode and write a value; returns `false` when the failure policy skipped it
    pub fn write_value(&self, path: &Path, value: &Value) -> Result<bool> {
        let bytes = match self.serializer.encode(value) {
            Ok(bytes) => bytes,
            Err(err) => return self.on_encode_error(path, err),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, bytes)?;
        debug!(path = %path.display(), "artifact written");
        Ok(true)
    }

    fn on_encode_error(&self, path: &Path, err: SerializeError) -> Result<bool> {
        match self.error_rules.resolve(&err) {
            SerializeErrorAction::Ignore => {
                debug!(path = %path.display(), error = %err, "artifact skipped");
                Ok(false)
            }
            SerializeErrorAction::Warn => {
                warn!(path = %path.display(), error = %err, "failed to serialize artifact, skipping");
                Ok(false)
            }
            SerializeErrorAction::Raise => Err(err.into()),
        }
    }

    /// Read and decode a value; `None` when the file does not exist
    pub fn read_value(&self, path: &Path) -> Result<Option<Value>> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(self.serializer.decode(&bytes)?))
    }

    fn write_typed<T: Serialize>(&self, path: &Path, value: &T) -> Result<bool> {
        let value = serde_json::to_value(value)?;
        self.write_value(path, &value)
    }

    fn read_typed<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        match self.read_value(path)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Require that `path` decodes and re-encodes to the same bytes as `value`
    pub fn verify_artifact(&self, path: &Path, value: &Value) -> Result<()> {
        let expected = self.serializer.encode(value)?;
        let stored = self
            .read_value(path)?
            .ok_or_else(|| RewindError::VerifyMismatch(path.to_path_buf()))?;
        if self.serializer.encode(&stored)? != expected {
            return Err(RewindError::VerifyMismatch(path.to_path_buf()));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Case artifacts
    // ------------------------------------------------------------------

    /// Case directory
    pub fn case_dir(&self, key: &CaseKey) -> PathBuf {
        self.layout.case_dir(key)
    }

    /// Persist case inputs
    pub fn save_inputs(&self, key: &CaseKey, inputs: &Inputs) -> Result<bool> {
        self.write_typed(&self.layout.artifact(key, layout::INPUTS), inputs)
    }

    /// Persist the function token
    pub fn save_token(&self, key: &CaseKey, token: &FunctionToken) -> Result<bool> {
        self.write_typed(&self.layout.artifact(key, layout::FUNC), token)
    }

    /// Persist the case outcome, verifying it when configured
    pub fn save_outcome(&self, key: &CaseKey, outcome: &Outcome) -> Result<bool> {
        let path = self.layout.artifact(key, layout::OUTPUTS);
        let value = serde_json::to_value(outcome)?;
        let written = self.write_value(&path, &value)?;
        if written && self.verify_on_record {
            self.verify_artifact(&path, &value)?;
        }
        Ok(written)
    }

    /// Load case inputs
    pub fn load_inputs(&self, key: &CaseKey) -> Result<Inputs> {
        self.load_artifact(key, layout::INPUTS)
    }

    /// Load the expected outcome
    pub fn load_outcome(&self, key: &CaseKey) -> Result<Outcome> {
        self.load_artifact(key, layout::OUTPUTS)
    }

    /// Load the function token
    pub fn load_token(&self, key: &CaseKey) -> Result<FunctionToken> {
        self.load_artifact(key, layout::FUNC)
    }

    fn load_artifact<T: DeserializeOwned>(&self, key: &CaseKey, artifact: &'static str) -> Result<T> {
        let path = self.layout.artifact(key, artifact);
        self.read_typed(&path)?
            .ok_or(RewindError::MissingArtifact { artifact, path })
    }

    /// Delete a case directory; a missing directory is not an error
    pub fn remove_case(&self, key: &CaseKey) -> Result<()> {
        let dir = self.case_dir(key);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!(case = %key, "case directory removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // ------------------------------------------------------------------
    // Fixtures
    // ------------------------------------------------------------------

    /// Persist a stub fixture under `caller`
    pub fn save_stub_fixture(
        &self,
        caller: &CaseKey,
        stub: &str,
        ordinal: u64,
        hash: &str,
        outcome: &Outcome,
    ) -> Result<bool> {
        let path = self.layout.stub_fixture(caller, stub, ordinal, hash);
        self.write_typed(&path, outcome)
    }

    /// Load a stub fixture; a missing fixture is [`RewindError::FixtureNotFound`]
    pub fn load_stub_fixture(&self, caller: &CaseKey, stub: &str, ordinal: u64, hash: &str) -> Result<Outcome> {
        let path = self.layout.stub_fixture(caller, stub, ordinal, hash);
        self.read_typed(&path)?
            .ok_or(RewindError::FixtureNotFound(path))
    }

    /// Persist a fast-path fixture under `caller`
    pub fn save_fastreg(
        &self,
        caller: &CaseKey,
        callee: &str,
        ordinal: u64,
        hash: &str,
        fixture: &FastPathFixture,
    ) -> Result<Vec<PathBuf>> {
        let output = self.layout.fastreg_output(caller, callee, ordinal, hash);
        let counter = self.layout.fastreg_counter(caller, callee, ordinal, hash);
        let mut written = Vec::with_capacity(2);
        if self.write_typed(&output, &fixture.outcome)? {
            written.push(output);
        }
        if self.write_typed(&counter, &fixture.stub_counter_delta)? {
            written.push(counter);
        }
        Ok(written)
    }

    /// Load a fast-path fixture; `None` unless both files exist
    pub fn load_fastreg(
        &self,
        caller: &CaseKey,
        callee: &str,
        ordinal: u64,
        hash: &str,
    ) -> Result<Option<FastPathFixture>> {
        let output = self.layout.fastreg_output(caller, callee, ordinal, hash);
        let counter = self.layout.fastreg_counter(caller, callee, ordinal, hash);
        let Some(outcome) = self.read_typed::<Outcome>(&output)? else {
            return Ok(None);
        };
        let Some(stub_counter_delta) = self.read_typed(&counter)? else {
            return Ok(None);
        };
        Ok(Some(FastPathFixture {
            outcome,
            stub_counter_delta,
        }))
    }

    /// Whether a fast-path fixture exists at the key
    pub fn fastreg_exists(&self, caller: &CaseKey, callee: &str, ordinal: u64, hash: &str) -> bool {
        self.layout.fastreg_output(caller, callee, ordinal, hash).is_file()
    }

    // ------------------------------------------------------------------
    // Listing
    // ------------------------------------------------------------------

    /// Function ids with at least one case directory, sorted
    pub fn list_functions(&self) -> Result<Vec<String>> {
        list_dirs(self.root())
    }

    /// Case ids of a function, sorted
    pub fn list_cases(&self, fcid: &str) -> Result<Vec<String>> {
        list_dirs(&self.layout.function_dir(fcid))
    }

    /// Every case key in the store, sorted by `(fcid, tcid)`
    pub fn list_all_cases(&self) -> Result<Vec<CaseKey>> {
        let mut keys = Vec::new();
        for fcid in self.list_functions()? {
            for tcid in self.list_cases(&fcid)? {
                keys.push(CaseKey::new(&fcid, tcid));
            }
        }
        Ok(keys)
    }

    /// Number of persisted cases for `fcid`, counting directories with a `func` artifact
    pub fn count_cases(&self, fcid: &str) -> Result<usize> {
        let mut count = 0;
        for tcid in self.list_cases(fcid)? {
            if self.layout.artifact(&CaseKey::new(fcid, tcid), layout::FUNC).is_file() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// File names under a case's `stub/` directory, sorted
    pub fn list_stub_fixtures(&self, key: &CaseKey) -> Result<Vec<String>> {
        list_files(&self.case_dir(key).join(layout::STUB_DIR))
    }

    /// File names under a case's `fastreg/` directory, sorted
    pub fn list_fastreg_fixtures(&self, key: &CaseKey) -> Result<Vec<String>> {
        list_files(&self.case_dir(key).join(layout::FASTREG_DIR))
    }
}

fn list_entries(dir: &Path, want_dirs: bool) -> Result<Vec<String>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() != want_dirs {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

fn list_dirs(dir: &Path) -> Result<Vec<String>> {
    list_entries(dir, true)
}

fn list_files(dir: &Path) -> Result<Vec<String>> {
    list_entries(dir, false)
}

#[cfg(test)]
mod tests;
