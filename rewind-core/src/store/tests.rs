use super::*;
use serde_json::json;
use tempfile::TempDir;

use crate::registry::FunctionKind;

/// Refuses to encode objects carrying a `"socket"` key
#[derive(Debug)]
struct PickySerializer;

impl Serializer for PickySerializer {
    fn name(&self) -> &str {
        "picky"
    }

    fn encode(&self, value: &Value) -> std::result::Result<Vec<u8>, SerializeError> {
        if value.to_string().contains("socket") {
            return Err(SerializeError::new("TypeError", "can't encode socket object"));
        }
        JsonSerializer.encode(value)
    }

    fn decode(&self, bytes: &[u8]) -> std::result::Result<Value, SerializeError> {
        JsonSerializer.decode(bytes)
    }
}

fn picky_store(tmp: &TempDir, action: SerializeErrorAction) -> ArtifactStore {
    ArtifactStore::new(tmp.path())
        .with_serializer(Arc::new(PickySerializer))
        .with_error_rules(SerializeErrorRules::always(action))
}

#[test]
fn test_case_artifacts() {
    let tmp = TempDir::new().unwrap();
    let store = ArtifactStore::new(tmp.path());
    let key = CaseKey::new("hello", "tc-1");

    let inputs = Inputs::from_args([json!("Hi"), json!("World")]);
    let token = FunctionToken::new("hello", "hello", FunctionKind::Recorded);
    let outcome = Outcome::Returned(json!("Hi World"));

    assert!(store.save_inputs(&key, &inputs).unwrap());
    assert!(store.save_token(&key, &token).unwrap());
    assert!(store.save_outcome(&key, &outcome).unwrap());

    assert_eq!(store.load_inputs(&key).unwrap(), inputs);
    assert_eq!(store.load_token(&key).unwrap(), token);
    assert_eq!(store.load_outcome(&key).unwrap(), outcome);
    assert_eq!(store.count_cases("hello").unwrap(), 1);
    assert_eq!(store.list_all_cases().unwrap(), vec![key.clone()]);

    store.remove_case(&key).unwrap();
    assert_eq!(store.count_cases("hello").unwrap(), 0);
    assert!(matches!(
        store.load_outcome(&key),
        Err(RewindError::MissingArtifact { artifact: "outputs", .. })
    ));
    // removing twice is fine
    store.remove_case(&key).unwrap();
}

#[test]
fn test_count_cases_requires_func() {
    let tmp = TempDir::new().unwrap();
    let store = ArtifactStore::new(tmp.path());
    std::fs::create_dir_all(tmp.path().join("f/partial")).unwrap();
    store
        .save_token(&CaseKey::new("f", "full"), &FunctionToken::new("f", "f", FunctionKind::Recorded))
        .unwrap();

    assert_eq!(store.list_cases("f").unwrap(), vec!["full", "partial"]);
    assert_eq!(store.count_cases("f").unwrap(), 1);
    assert_eq!(store.count_cases("unknown").unwrap(), 0);
}

#[test]
fn test_stub_fixture_lookup() {
    let tmp = TempDir::new().unwrap();
    let store = ArtifactStore::new(tmp.path());
    let caller = CaseKey::new("hello", "tc-1");
    let outcome = Outcome::Returned(json!(42));

    store.save_stub_fixture(&caller, "stub", 0, "0123456789", &outcome).unwrap();
    assert_eq!(store.load_stub_fixture(&caller, "stub", 0, "0123456789").unwrap(), outcome);
    assert_eq!(
        store.list_stub_fixtures(&caller).unwrap(),
        vec!["stub.0.0123456789.output"]
    );

    let missing = store.load_stub_fixture(&caller, "stub", 1, "0123456789").unwrap_err();
    assert!(matches!(missing, RewindError::FixtureNotFound(ref p) if p.ends_with("stub.1.0123456789.output")));
}

#[test]
fn test_fastreg_needs_both_files() {
    let tmp = TempDir::new().unwrap();
    let store = ArtifactStore::new(tmp.path());
    let caller = CaseKey::new("outer", "tc-1");
    let fixture = FastPathFixture {
        outcome: Outcome::Raised(crate::outcome::Raised::new("ValueError", "nope")),
        stub_counter_delta: BTreeMap::from([("stub".to_string(), 2)]),
    };

    let written = store.save_fastreg(&caller, "inner", 0, "h", &fixture).unwrap();
    assert_eq!(written.len(), 2);
    assert!(store.fastreg_exists(&caller, "inner", 0, "h"));
    assert_eq!(store.load_fastreg(&caller, "inner", 0, "h").unwrap(), Some(fixture));

    std::fs::remove_file(&written[1]).unwrap();
    assert_eq!(store.load_fastreg(&caller, "inner", 0, "h").unwrap(), None);
    assert_eq!(store.load_fastreg(&caller, "inner", 1, "h").unwrap(), None);
}

#[test]
fn test_encode_failure_policy() {
    let tmp = TempDir::new().unwrap();
    let key = CaseKey::new("f", "t");
    let bad = Outcome::Returned(json!({"socket": 1}));

    let store = picky_store(&tmp, SerializeErrorAction::Warn);
    assert!(!store.save_outcome(&key, &bad).unwrap());
    assert!(!store.layout().artifact(&key, layout::OUTPUTS).exists());

    let store = picky_store(&tmp, SerializeErrorAction::Ignore);
    assert!(!store.save_outcome(&key, &bad).unwrap());

    let store = picky_store(&tmp, SerializeErrorAction::Raise);
    let err = store.save_outcome(&key, &bad).unwrap_err();
    assert!(matches!(err, RewindError::Serialization(ref e) if e.kind == "TypeError"));
}

#[test]
fn test_verify_on_record_catches_lossy_serializer() {
    /// Drops every object key named "lost" on decode
    #[derive(Debug)]
    struct Lossy;

    impl Serializer for Lossy {
        fn name(&self) -> &str {
            "lossy"
        }
        fn encode(&self, value: &Value) -> std::result::Result<Vec<u8>, SerializeError> {
            JsonSerializer.encode(value)
        }
        fn decode(&self, bytes: &[u8]) -> std::result::Result<Value, SerializeError> {
            let mut value = JsonSerializer.decode(bytes)?;
            if let Some(obj) = value.pointer_mut("/value").and_then(Value::as_object_mut) {
                obj.remove("lost");
            }
            Ok(value)
        }
    }

    let tmp = TempDir::new().unwrap();
    let key = CaseKey::new("f", "t");
    let store = ArtifactStore::new(tmp.path())
        .with_serializer(Arc::new(Lossy))
        .with_verify_on_record(true);

    store.save_outcome(&key, &Outcome::Returned(json!({"kept": 1}))).unwrap();
    let err = store
        .save_outcome(&key, &Outcome::Returned(json!({"lost": 1})))
        .unwrap_err();
    assert!(matches!(err, RewindError::VerifyMismatch(_)));
}

#[test]
fn test_yaml_store() {
    let tmp = TempDir::new().unwrap();
    let store = ArtifactStore::new(tmp.path()).with_serializer(SerializerKind::Yaml.build());
    let key = CaseKey::new("f", "t");
    let inputs = Inputs::new().with_kwarg("to", "World").unwrap();

    store.save_inputs(&key, &inputs).unwrap();
    let raw = std::fs::read_to_string(store.layout().artifact(&key, layout::INPUTS)).unwrap();
    assert!(raw.contains("to: World"));
    assert_eq!(store.load_inputs(&key).unwrap(), inputs);
}
