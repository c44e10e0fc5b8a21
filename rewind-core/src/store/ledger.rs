//! Append-only metadata ledger (`meta.json`)
//!
//! One entry is appended per successfully recorded case. The ledger is kept
//! apart from the fixtures so that fixture edits can be detected later with
//! [`Ledger::verify`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::Result;
use crate::outcome::CaseKey;

/// Serializes read-modify-write cycles of concurrent refresh workers
static APPEND_LOCK: Mutex<()> = Mutex::new(());

/// One ledger record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    /// Version of the engine that recorded the case
    pub version: String,

    /// When the case was recorded
    pub created_at: DateTime<Utc>,

    /// Function id
    pub fcid: String,

    /// Case id
    pub tcid: String,

    /// Hex SHA-256 over the case directory
    pub hash: String,

    /// Total bytes in the case directory
    pub size: u64,
}

impl LedgerEntry {
    /// Key of the recorded case
    pub fn key(&self) -> CaseKey {
        CaseKey::new(&self.fcid, &self.tcid)
    }
}

/// Result of re-checking a ledger entry against the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    /// Content hash still matches
    Unchanged,
    /// Case directory exists but its content changed
    Modified,
    /// Case directory is gone
    Missing,
}

/// Outcome of [`Ledger::verify`] for one case
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerCheck {
    /// Latest entry for the case
    pub entry: LedgerEntry,
    /// Current state
    pub status: LedgerStatus,
}

/// Handle on a `meta.json` file
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    /// Open the ledger at `path`; the file is created on first append
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Ledger file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all entries; a missing ledger is empty
    pub fn load(&self) -> Result<Vec<LedgerEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let bytes = std::fs::read(&self.path)?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Append an entry describing the current content of `case_dir`
    pub fn record(&self, key: &CaseKey, case_dir: &Path) -> Result<LedgerEntry> {
        let (hash, size) = digest_dir(case_dir)?;
        let entry = LedgerEntry {
            version: crate::VERSION.to_string(),
            created_at: Utc::now(),
            fcid: key.fcid.clone(),
            tcid: key.tcid.clone(),
            hash,
            size,
        };
        self.append(entry.clone())?;
        Ok(entry)
    }

    /// Append an entry, rewriting the file atomically
    pub fn append(&self, entry: LedgerEntry) -> Result<()> {
        let _guard = APPEND_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        let mut entries = self.load()?;
        entries.push(entry);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&serde_json::to_vec_pretty(&entries)?)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Re-hash every case named in the ledger, latest entry per case
    pub fn verify(&self, root: &Path) -> Result<Vec<LedgerCheck>> {
        let mut latest: BTreeMap<CaseKey, LedgerEntry> = BTreeMap::new();
        for entry in self.load()? {
            latest.insert(entry.key(), entry);
        }

        let mut checks = Vec::with_capacity(latest.len());
        for (key, entry) in latest {
            let dir = root.join(&key.fcid).join(&key.tcid);
            let status = if !dir.is_dir() {
                LedgerStatus::Missing
            } else {
                let (hash, size) = digest_dir(&dir)?;
                if hash == entry.hash && size == entry.size {
                    LedgerStatus::Unchanged
                } else {
                    LedgerStatus::Modified
                }
            };
            checks.push(LedgerCheck { entry, status });
        }
        Ok(checks)
    }
}

/// Hash every file under `dir` (sorted relative path, then contents) and sum their sizes
pub fn digest_dir(dir: &Path) -> std::io::Result<(String, u64)> {
    let mut files = Vec::new();
    collect_files(dir, dir, &mut files)?;
    files.sort();

    let mut hasher = Sha256::new();
    let mut size = 0u64;
    for rel in files {
        let contents = std::fs::read(dir.join(&rel))?;
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(&contents);
        size += contents.len() as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), size))
}

fn collect_files(base: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(base, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(base) {
            out.push(rel.to_path_buf());
        }
    }
    Ok(())
}

#[cfg(test)]
mod ledger_tests {
    use super::*;
    use tempfile::TempDir;

    fn write_case(root: &Path, fcid: &str, tcid: &str, body: &str) -> PathBuf {
        let dir = root.join(fcid).join(tcid);
        std::fs::create_dir_all(dir.join("stub")).unwrap();
        std::fs::write(dir.join("outputs"), body).unwrap();
        std::fs::write(dir.join("stub/s.0.abc.output"), "1").unwrap();
        dir
    }

    #[test]
    fn test_append_and_load() {
        let tmp = TempDir::new().unwrap();
        let dir = write_case(tmp.path(), "hello", "tc-1", "x");
        let ledger = Ledger::new(tmp.path().join("meta.json"));

        assert!(ledger.load().unwrap().is_empty());
        let entry = ledger.record(&CaseKey::new("hello", "tc-1"), &dir).unwrap();
        assert_eq!(entry.size, 2);
        assert_eq!(entry.hash.len(), 64);

        let loaded = ledger.load().unwrap();
        assert_eq!(loaded, vec![entry]);

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(ledger.path()).unwrap()).unwrap();
        assert!(raw[0].get("createdAt").is_some());
    }

    #[test]
    fn test_verify_detects_drift() {
        let tmp = TempDir::new().unwrap();
        let ledger = Ledger::new(tmp.path().join("meta.json"));
        let a = write_case(tmp.path(), "f", "a", "same");
        let b = write_case(tmp.path(), "f", "b", "before");
        let c = write_case(tmp.path(), "f", "c", "gone");
        for (tcid, dir) in [("a", &a), ("b", &b), ("c", &c)] {
            ledger.record(&CaseKey::new("f", tcid), dir).unwrap();
        }

        std::fs::write(b.join("outputs"), "after").unwrap();
        std::fs::remove_dir_all(&c).unwrap();

        let statuses: Vec<_> = ledger
            .verify(tmp.path())
            .unwrap()
            .into_iter()
            .map(|c| (c.entry.tcid, c.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("a".to_string(), LedgerStatus::Unchanged),
                ("b".to_string(), LedgerStatus::Modified),
                ("c".to_string(), LedgerStatus::Missing),
            ]
        );
    }
}
