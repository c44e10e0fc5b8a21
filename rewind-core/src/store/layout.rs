//! Artifact paths under the store root

use std::path::{Path, PathBuf};

use crate::outcome::CaseKey;

/// Case inputs artifact name
pub const INPUTS: &str = "inputs";
/// Case outcome artifact name
pub const OUTPUTS: &str = "outputs";
/// Function token artifact name
pub const FUNC: &str = "func";
/// Stub fixture directory
pub const STUB_DIR: &str = "stub";
/// Fast-path fixture directory
pub const FASTREG_DIR: &str = "fastreg";
/// Metadata ledger file name
pub const LEDGER: &str = "meta.json";

/// Path builder for an artifact root
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    /// Create a layout rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/{fcid}`
    pub fn function_dir(&self, fcid: &str) -> PathBuf {
        self.root.join(fcid)
    }

    /// `{root}/{fcid}/{tcid}`
    pub fn case_dir(&self, key: &CaseKey) -> PathBuf {
        self.root.join(&key.fcid).join(&key.tcid)
    }

    /// `{root}/{fcid}/{tcid}/{artifact}`
    pub fn artifact(&self, key: &CaseKey, artifact: &str) -> PathBuf {
        self.case_dir(key).join(artifact)
    }

    /// `{root}/{fcid}/{tcid}/stub/{stub}.{ordinal}.{hash}.output`
    pub fn stub_fixture(&self, caller: &CaseKey, stub: &str, ordinal: u64, hash: &str) -> PathBuf {
        self.case_dir(caller)
            .join(STUB_DIR)
            .join(format!("{}.{}.{}.output", stub, ordinal, hash))
    }

    /// `{root}/{fcid}/{tcid}/fastreg/{callee}.{ordinal}.{hash}.output`
    pub fn fastreg_output(&self, caller: &CaseKey, callee: &str, ordinal: u64, hash: &str) -> PathBuf {
        self.case_dir(caller)
            .join(FASTREG_DIR)
            .join(format!("{}.{}.{}.output", callee, ordinal, hash))
    }

    /// `{root}/{fcid}/{tcid}/fastreg/{callee}.{ordinal}.{hash}.stub_counter`
    pub fn fastreg_counter(&self, caller: &CaseKey, callee: &str, ordinal: u64, hash: &str) -> PathBuf {
        self.case_dir(caller)
            .join(FASTREG_DIR)
            .join(format!("{}.{}.{}.stub_counter", callee, ordinal, hash))
    }

    /// `{root}/meta.json`
    pub fn ledger(&self) -> PathBuf {
        self.root.join(LEDGER)
    }
}
