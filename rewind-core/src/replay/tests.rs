use super::*;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

use crate::ids::SequentialCaseIds;
use crate::outcome::{CallError, CaseKey, Inputs, Outcome, Raised};
use crate::registry::{BoundaryFn, OnDuplicate, RecordedFn, Registry};
use crate::session::Session;
use crate::store::{ArtifactStore, LedgerStatus, layout};

/// `greet(name)` asks the boundary `lookup(name)` for a title
struct Greeter {
    tmp: TempDir,
    registry: Registry,
    lookups: Arc<AtomicUsize>,
    lookup: BoundaryFn,
    greet: RecordedFn,
}

fn greeter() -> Greeter {
    let tmp = TempDir::new().unwrap();
    let registry = Registry::new();
    let lookups = Arc::new(AtomicUsize::new(0));

    let calls = Arc::clone(&lookups);
    let lookup = registry
        .boundary("lookup", move |_, inputs| {
            calls.fetch_add(1, Ordering::SeqCst);
            let name: String = inputs.arg(0)?;
            Ok(json!(format!("Dr. {name}")))
        })
        .unwrap();

    let greet_lookup = lookup.clone();
    let greet = registry
        .recorded("greet", move |session, inputs| {
            let name: String = inputs.arg(0)?;
            if name.is_empty() {
                return Err(Raised::new("ValueError", "empty name").into());
            }
            let title = greet_lookup.call(session, &Inputs::from_args([json!(name)]))?;
            Ok(json!(format!("Hi {}", title.as_str().unwrap_or_default())))
        })
        .unwrap();

    Greeter {
        tmp,
        registry,
        lookups,
        lookup,
        greet,
    }
}

impl Greeter {
    fn store(&self) -> ArtifactStore {
        ArtifactStore::new(self.tmp.path())
    }

    fn record(&self, names: &[&str]) {
        let session = Session::builder()
            .record()
            .root(self.tmp.path())
            .ids(SequentialCaseIds::new())
            .build();
        for name in names {
            let _ = self.greet.call(&session, &Inputs::from_args([json!(name)]));
        }
    }

    fn runner(&self) -> (ReplayRunner, Arc<CollectingPrinter>) {
        let printer = Arc::new(CollectingPrinter::new());
        let runner = ReplayRunner::new(self.store(), Arc::new(self.registry.clone()))
            .with_reporter(Reporter::default().with_shared_printer(printer.clone()));
        (runner, printer)
    }

    fn relink_greet<F>(&self, body: F)
    where
        F: Fn(&Session, &Inputs) -> crate::outcome::CallResult + Send + Sync + 'static,
    {
        self.registry
            .recorded_with("greet", Some(OnDuplicate::Ignore), body)
            .unwrap();
    }
}

fn statuses(summary: &RunSummary) -> Vec<CaseStatus> {
    summary.results.iter().map(|r| r.status).collect()
}

#[test]
fn test_round_trip_succeeds_without_boundary_calls() {
    let g = greeter();
    g.record(&["World", ""]);
    assert_eq!(g.lookups.load(Ordering::SeqCst), 1);

    let (runner, printer) = g.runner();
    let summary = runner.run(&RunOptions::test()).unwrap();

    assert_eq!(statuses(&summary), vec![CaseStatus::Success, CaseStatus::Success]);
    assert_eq!(g.lookups.load(Ordering::SeqCst), 1);
    assert!(summary.passed());
    assert_eq!(summary.summary_line(), "Passed (2/2)");

    let lines = printer.lines();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("REWIND: SUCCESS    fc=greet tc=0"));
    assert_eq!(lines[2], "Passed (2/2)");
}

#[test]
fn test_value_drift_fails() {
    let g = greeter();
    g.record(&["World"]);
    g.relink_greet(|_, _| Ok(json!("Hello there")));

    let (runner, _) = g.runner();
    let summary = runner.run(&RunOptions::test()).unwrap();
    let result = &summary.results[0];

    assert_eq!(result.status, CaseStatus::Fail);
    assert_eq!(result.message, "Outputs not matched.");
    assert_eq!(result.expected, Some(Outcome::Returned(json!("Hi Dr. World"))));
    assert_eq!(result.actual, Some(Outcome::Returned(json!("Hello there"))));
    assert_eq!(summary.summary_line(), "Failed (0/1)");
}

#[test]
fn test_raise_versus_return_is_a_type_mismatch() {
    let g = greeter();
    g.record(&["World"]);
    g.relink_greet(|_, _| Err(Raised::new("ValueError", "nope").into()));

    let (runner, _) = g.runner();
    let summary = runner.run(&RunOptions::test()).unwrap();
    assert_eq!(summary.results[0].status, CaseStatus::Fail);
    assert_eq!(summary.results[0].message, "Output type mismatch: raise != return");
}

#[test]
fn test_unrecorded_boundary_call_fails_the_case() {
    let g = greeter();
    g.record(&["World"]);

    // recorded inputs replaced: the lookup now hashes differently
    let key = CaseKey::new("greet", "0");
    g.store()
        .save_inputs(&key, &Inputs::from_args([json!("Moon")]))
        .unwrap();

    let (runner, _) = g.runner();
    let summary = runner.run(&RunOptions::test()).unwrap();
    let result = &summary.results[0];
    assert_eq!(result.status, CaseStatus::Fail);
    match &result.actual {
        Some(Outcome::Raised(raised)) => assert_eq!(raised.kind, "rewind::FixtureNotFound"),
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn test_missing_artifact_is_an_error() {
    let g = greeter();
    g.record(&["World"]);
    let key = CaseKey::new("greet", "0");
    std::fs::remove_file(g.store().layout().artifact(&key, layout::OUTPUTS)).unwrap();

    let (runner, _) = g.runner();
    let summary = runner.run(&RunOptions::test()).unwrap();
    assert_eq!(summary.results[0].status, CaseStatus::Error);
    assert!(summary.results[0].message.contains("outputs"));
}

#[test]
fn test_unknown_function_is_an_error() {
    let g = greeter();
    g.record(&["World"]);

    let runner = ReplayRunner::new(g.store(), Arc::new(Registry::new()))
        .with_reporter(Reporter::default().with_printer(|_: &str| {}));
    let summary = runner.run(&RunOptions::test()).unwrap();
    assert_eq!(summary.results[0].status, CaseStatus::Error);
    assert_eq!(summary.results[0].message, "Function greet could not be located.");
}

#[test]
fn test_panicking_body_is_an_error() {
    let g = greeter();
    g.record(&["World"]);
    g.relink_greet(|_, _| panic!("boom"));

    let (runner, _) = g.runner();
    let summary = runner.run(&RunOptions::test()).unwrap();
    assert_eq!(summary.results[0].status, CaseStatus::Error);
    assert_eq!(summary.results[0].message, "panicked: boom");
}

#[test]
fn test_filters_skip_cases() {
    let g = greeter();
    g.record(&["World", "Moon", "Sun"]);

    let (runner, _) = g.runner();
    let options = RunOptions {
        include_cases: vec!["0".into(), "2".into()],
        exclude_cases: vec!["2".into()],
        ..RunOptions::test()
    };
    let summary = runner.run(&options).unwrap();
    assert_eq!(
        statuses(&summary),
        vec![CaseStatus::Success, CaseStatus::Skip, CaseStatus::Skip]
    );
    assert_eq!(summary.summary_line(), "Passed (3/3)");

    let options = RunOptions {
        exclude_functions: vec!["greet".into()],
        ..RunOptions::test()
    };
    let summary = runner.run(&options).unwrap();
    assert!(summary.results.iter().all(|r| r.status == CaseStatus::Skip));
}

#[test]
fn test_refresh_overwrites_then_matches() {
    let g = greeter();
    g.record(&["World"]);
    g.relink_greet(|_, _| Ok(json!("Hello there")));

    let (runner, _) = g.runner();
    let summary = runner.run(&RunOptions::refresh()).unwrap();
    assert_eq!(statuses(&summary), vec![CaseStatus::Refresh]);
    assert!(summary.passed());

    let key = CaseKey::new("greet", "0");
    assert_eq!(g.store().load_outcome(&key).unwrap(), Outcome::Returned(json!("Hello there")));

    let summary = runner.run(&RunOptions::test()).unwrap();
    assert_eq!(statuses(&summary), vec![CaseStatus::Success]);

    // the ledger follows the refreshed outputs
    let checks = g.store().ledger().verify(g.tmp.path()).unwrap();
    assert_eq!(checks.len(), 1);
    assert_eq!(checks[0].status, LedgerStatus::Unchanged);
}

#[test]
fn test_refresh_with_unrecorded_boundary_call_keeps_outputs() {
    let g = greeter();
    g.record(&["World"]);
    let lookup = g.lookup.clone();
    g.relink_greet(move |session, inputs| {
        let name: String = inputs.arg(0)?;
        lookup.call(session, &Inputs::from_args([json!(name)]))?;
        // second lookup has no fixture
        lookup.call(session, &Inputs::from_args([json!(name)]))?;
        Ok(json!("twice"))
    });

    let outputs = g.store().layout().artifact(&CaseKey::new("greet", "0"), layout::OUTPUTS);
    let before = std::fs::read(&outputs).unwrap();

    let (runner, _) = g.runner();
    let summary = runner.run(&RunOptions::refresh()).unwrap();
    assert_eq!(statuses(&summary), vec![CaseStatus::Error]);
    assert!(summary.results[0].message.starts_with("Fixture not found"));
    assert_eq!(std::fs::read(&outputs).unwrap(), before);
    assert_eq!(g.store().ledger().load().unwrap().len(), 1);

    let summary = runner.run(&RunOptions::test()).unwrap();
    assert_eq!(statuses(&summary), vec![CaseStatus::Fail]);
}

#[test]
fn test_custom_equality_policy() {
    let g = greeter();
    g.record(&["World"]);
    g.relink_greet(|_, _| Ok(json!("HI DR. WORLD")));

    let (runner, _) = g.runner();
    let runner = runner.with_equality(Arc::new(ValueEquality(|a: &serde_json::Value, e: &serde_json::Value| {
        Some(a.as_str()?.eq_ignore_ascii_case(e.as_str()?))
    })));
    let summary = runner.run(&RunOptions::test()).unwrap();
    assert_eq!(statuses(&summary), vec![CaseStatus::Success]);
}

#[test]
fn test_engine_error_in_body_is_an_error() {
    let g = greeter();
    g.record(&["World"]);
    g.relink_greet(|_, _| Err(CallError::Engine(crate::RewindError::Other("store offline".into()))));

    let (runner, _) = g.runner();
    let summary = runner.run(&RunOptions::test()).unwrap();
    assert_eq!(summary.results[0].status, CaseStatus::Error);
    assert_eq!(summary.results[0].message, "store offline");
}

#[tokio::test]
async fn test_partitioned_run_matches_sequential() {
    let g = greeter();
    g.record(&["World", "", "Moon"]);

    let (runner, printer) = g.runner();
    let summary = runner.run_partitioned(&RunOptions::test()).await.unwrap();
    assert_eq!(statuses(&summary), vec![CaseStatus::Success; 3]);
    assert_eq!(g.lookups.load(Ordering::SeqCst), 2);

    let keys: Vec<String> = summary.results.iter().map(|r| r.key.tcid.clone()).collect();
    assert_eq!(keys, vec!["0", "1", "2"]);
    assert_eq!(printer.lines().last().unwrap(), "Passed (3/3)");
}

mod nested {
    use super::*;

    /// `outer(x)` calls `stub(x)`, then `inner(x)` which calls `stub` twice
    struct Tree {
        tmp: TempDir,
        registry: Registry,
        inner_calls: Arc<AtomicUsize>,
    }

    fn tree() -> (Tree, RecordedFn) {
        let tmp = TempDir::new().unwrap();
        let registry = Registry::new();
        let inner_calls = Arc::new(AtomicUsize::new(0));

        let stub = registry
            .boundary("stub", |_, inputs| {
                let x: i64 = inputs.arg(0)?;
                Ok(json!(x * 10))
            })
            .unwrap();
        let calls = Arc::clone(&inner_calls);
        let inner_stub = stub.clone();
        let inner = registry
            .recorded("inner", move |session, inputs| {
                calls.fetch_add(1, Ordering::SeqCst);
                let x: i64 = inputs.arg(0)?;
                let a = inner_stub.call(session, &Inputs::from_args([json!(x)]))?;
                let b = inner_stub.call(session, &Inputs::from_args([json!(x + 1)]))?;
                Ok(json!(a.as_i64().unwrap_or(0) + b.as_i64().unwrap_or(0)))
            })
            .unwrap();
        let outer = registry
            .recorded("outer", move |session, inputs| {
                let x: i64 = inputs.arg(0)?;
                let a = stub.call(session, &Inputs::from_args([json!(x)]))?;
                let b = inner.call(session, &Inputs::from_args([json!(x)]))?;
                Ok(json!([a, b]))
            })
            .unwrap();

        let session = Session::builder()
            .record()
            .root(tmp.path())
            .ids(SequentialCaseIds::new())
            .build();
        outer.call(&session, &Inputs::from_args([json!(3)])).unwrap();

        (
            Tree {
                tmp,
                registry,
                inner_calls,
            },
            outer,
        )
    }

    fn snapshot(root: &std::path::Path) -> Vec<(std::path::PathBuf, Vec<u8>)> {
        let mut files = Vec::new();
        let mut pending = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            for entry in std::fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    pending.push(path);
                } else if path.file_name().is_some_and(|n| n != layout::LEDGER) {
                    let bytes = std::fs::read(&path).unwrap();
                    files.push((path, bytes));
                }
            }
        }
        files.sort();
        files
    }

    #[test]
    fn test_fast_path_skips_nested_bodies() {
        let (t, _) = tree();
        let calls_after_record = t.inner_calls.load(Ordering::SeqCst);
        let runner = ReplayRunner::new(ArtifactStore::new(t.tmp.path()), Arc::new(t.registry.clone()))
            .with_reporter(Reporter::default().with_printer(|_: &str| {}));

        let full = runner.run(&RunOptions::test()).unwrap();
        assert!(full.passed());
        // outer replays inner's body; inner's own case replays it once more
        assert_eq!(t.inner_calls.load(Ordering::SeqCst), calls_after_record + 2);

        let fast = runner.run(&RunOptions::test().with_fast_path(true)).unwrap();
        assert!(fast.passed());
        assert_eq!(statuses(&fast), statuses(&full));
        assert_eq!(t.inner_calls.load(Ordering::SeqCst), calls_after_record + 3);
    }

    #[test]
    fn test_refresh_is_idempotent() {
        let (t, _) = tree();
        let runner = ReplayRunner::new(ArtifactStore::new(t.tmp.path()), Arc::new(t.registry.clone()))
            .with_reporter(Reporter::default().with_printer(|_: &str| {}));

        let before = snapshot(t.tmp.path());
        let options = RunOptions::refresh().with_fast_path(true);
        runner.run(&options).unwrap();
        let once = snapshot(t.tmp.path());
        runner.run(&options).unwrap();
        let twice = snapshot(t.tmp.path());

        assert_eq!(once, twice);
        assert_eq!(before, once);
    }
}
