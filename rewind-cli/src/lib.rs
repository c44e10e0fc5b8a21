//! Rewind CLI - inspection commands and batch replay entry point
//!
//! The `rewind` binary inspects an artifact root. Replaying needs the live
//! functions, so replay binaries link their own [`Registry`] and hand it to
//! [`run_batch`]:
//!
//! ```rust,no_run
//! use clap::Parser;
//! use rewind_cli::{BatchArgs, run_batch};
//! use rewind_core::registry::Registry;
//!
//! #[derive(Parser)]
//! struct Cli {
//!     #[command(flatten)]
//!     batch: BatchArgs,
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = Registry::new();
//!     // register functions here
//!     let summary = run_batch(registry, &Cli::parse().batch).await?;
//!     std::process::exit(if summary.passed() { 0 } else { 1 });
//! }
//! ```

use anyhow::{Context, Result};
use clap::Args;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use rewind_core::config::RewindConfig;
use rewind_core::outcome::{CaseKey, Outcome};
use rewind_core::registry::Registry;
use rewind_core::replay::{ReplayRunner, RunOptions, RunSummary};
use rewind_core::store::{ArtifactStore, LedgerStatus};

/// Where artifacts live
#[derive(Args, Debug, Clone, Default)]
pub struct StoreArgs {
    /// Configuration file (defaults to rewind.toml and REWIND_* variables)
    #[arg(long, env = "REWIND_CONFIG_PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Artifact root, overriding the configuration
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,
}

impl StoreArgs {
    /// Resolve the configuration these arguments describe
    pub fn load_config(&self) -> Result<RewindConfig> {
        let mut config = match &self.config {
            Some(path) => RewindConfig::from_file(path)?,
            None => RewindConfig::load()?,
        };
        if let Some(root) = &self.root {
            config.root = root.clone();
        }
        Ok(config)
    }
}

/// Batch replay options
#[derive(Args, Debug, Clone, Default)]
pub struct BatchArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Overwrite recorded outcomes instead of comparing
    #[arg(long)]
    pub refresh: bool,

    /// Only replay these function ids
    #[arg(long = "include-function", value_name = "FCID")]
    pub include_functions: Vec<String>,

    /// Skip these function ids
    #[arg(long = "exclude-function", value_name = "FCID")]
    pub exclude_functions: Vec<String>,

    /// Only replay these case ids
    #[arg(long = "include-case", value_name = "TCID")]
    pub include_cases: Vec<String>,

    /// Skip these case ids
    #[arg(long = "exclude-case", value_name = "TCID")]
    pub exclude_cases: Vec<String>,

    /// Answer nested recorded calls from fast-path fixtures
    #[arg(long)]
    pub fast_path: bool,

    /// Run each case on its own blocking worker
    #[arg(long)]
    pub partitioned: bool,
}

impl From<&BatchArgs> for RunOptions {
    fn from(args: &BatchArgs) -> Self {
        RunOptions {
            refresh: args.refresh,
            include_functions: args.include_functions.clone(),
            exclude_functions: args.exclude_functions.clone(),
            include_cases: args.include_cases.clone(),
            exclude_cases: args.exclude_cases.clone(),
            fast_path: args.fast_path,
        }
    }
}

/// Replay every case under the configured root against `registry`
pub async fn run_batch(registry: Registry, args: &BatchArgs) -> Result<RunSummary> {
    let config = args.store.load_config()?;
    let mut options = RunOptions::from(args);
    options.fast_path |= config.fast_path;

    let runner = ReplayRunner::new(config.store(), Arc::new(registry));
    let summary = if args.partitioned {
        runner.run_partitioned(&options).await?
    } else {
        runner.run(&options)?
    };
    Ok(summary)
}

/// Print every case, grouped by function
pub fn list_cases(store: &ArtifactStore, out: &mut impl Write) -> Result<()> {
    let functions = store.list_functions()?;
    if functions.is_empty() {
        writeln!(out, "No cases under {}", store.root().display())?;
        return Ok(());
    }
    for fcid in functions {
        let cases = store.list_cases(&fcid)?;
        writeln!(out, "{} ({} cases)", fcid, cases.len())?;
        for tcid in cases {
            writeln!(out, "  {}", tcid)?;
        }
    }
    Ok(())
}

/// Print a case's token, inputs, outcome and fixtures
pub fn show_case(store: &ArtifactStore, key: &CaseKey, out: &mut impl Write) -> Result<()> {
    let token = store
        .load_token(key)
        .with_context(|| format!("case {} has no readable function token", key))?;
    let inputs = store.load_inputs(key)?;
    let outcome = store.load_outcome(key)?;

    writeln!(out, "case:     {}", key)?;
    writeln!(out, "function: {} ({}, {})", token.fcid, token.kind, token.name)?;
    writeln!(out, "inputs:   {}", serde_json::to_string(&inputs)?)?;
    match outcome {
        Outcome::Returned(value) => writeln!(out, "returned: {}", value)?,
        Outcome::Raised(raised) => writeln!(out, "raised:   {}", raised)?,
    }

    let stubs = store.list_stub_fixtures(key)?;
    writeln!(out, "stub fixtures: {}", stubs.len())?;
    for name in stubs {
        writeln!(out, "  {}", name)?;
    }
    let fastreg = store.list_fastreg_fixtures(key)?;
    if !fastreg.is_empty() {
        writeln!(out, "fast-path fixtures: {}", fastreg.len())?;
        for name in fastreg {
            writeln!(out, "  {}", name)?;
        }
    }
    Ok(())
}

/// Print every ledger entry
pub fn print_ledger(store: &ArtifactStore, out: &mut impl Write) -> Result<()> {
    for entry in store.ledger().load()? {
        writeln!(
            out,
            "{} {}/{} {} {}B v{}",
            entry.created_at.to_rfc3339(),
            entry.fcid,
            entry.tcid,
            entry.hash,
            entry.size,
            entry.version
        )?;
    }
    Ok(())
}

/// Check the ledger; returns whether every case is unchanged
pub fn verify_ledger(store: &ArtifactStore, out: &mut impl Write) -> Result<bool> {
    let mut clean = true;
    for check in store.ledger().verify(store.root())? {
        let label = match check.status {
            LedgerStatus::Unchanged => "ok",
            LedgerStatus::Modified => "MODIFIED",
            LedgerStatus::Missing => "MISSING",
        };
        clean &= check.status == LedgerStatus::Unchanged;
        writeln!(out, "{:9} {}", label, check.entry.key())?;
    }
    Ok(clean)
}
