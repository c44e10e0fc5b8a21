//! Value serializers and the serialization-failure policy
//!
//! A [`Serializer`] turns captured values into artifact bytes and back. The
//! contract is that `decode(encode(v))` yields a value equal to `v`, and that
//! encoding is deterministic so that input hashes are stable across runs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::outcome::Inputs;

/// Error reported by a serializer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct SerializeError {
    /// Error category, matched by [`SerializeErrorRule::kind`]
    pub kind: String,

    /// Error description, matched by [`SerializeErrorRule::message_contains`]
    pub message: String,
}

impl SerializeError {
    /// Create a serialize error
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Encodes and decodes artifact payloads
pub trait Serializer: Send + Sync + fmt::Debug {
    /// Serializer name, used in configuration and logs
    fn name(&self) -> &str;

    /// Encode a value to bytes
    fn encode(&self, value: &Value) -> Result<Vec<u8>, SerializeError>;

    /// Decode bytes produced by [`Serializer::encode`]
    fn decode(&self, bytes: &[u8]) -> Result<Value, SerializeError>;
}

/// Pretty-printed JSON (the default)
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn name(&self) -> &str {
        "json"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, SerializeError> {
        serde_json::to_vec_pretty(value).map_err(|e| SerializeError::new("json", e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, SerializeError> {
        serde_json::from_slice(bytes).map_err(|e| SerializeError::new("json", e.to_string()))
    }
}

/// YAML documents
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlSerializer;

impl Serializer for YamlSerializer {
    fn name(&self) -> &str {
        "yaml"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, SerializeError> {
        serde_yaml::to_string(value)
            .map(String::into_bytes)
            .map_err(|e| SerializeError::new("yaml", e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, SerializeError> {
        serde_yaml::from_slice(bytes).map_err(|e| SerializeError::new("yaml", e.to_string()))
    }
}

/// Serializer selection used by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializerKind {
    /// [`JsonSerializer`]
    #[default]
    Json,
    /// [`YamlSerializer`]
    Yaml,
}

impl SerializerKind {
    /// Build the serializer
    pub fn build(self) -> std::sync::Arc<dyn Serializer> {
        match self {
            SerializerKind::Json => std::sync::Arc::new(JsonSerializer),
            SerializerKind::Yaml => std::sync::Arc::new(YamlSerializer),
        }
    }
}

/// What to do when an artifact cannot be encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializeErrorAction {
    /// Skip the artifact silently
    Ignore,
    /// Abort the recording
    Raise,
    /// Log a warning and skip the artifact
    #[default]
    Warn,
}

/// Matches serializer errors by kind and message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializeErrorRule {
    /// Required error kind; any kind when unset
    #[serde(default)]
    pub kind: Option<String>,

    /// Required message substring; any message when unset
    #[serde(default)]
    pub message_contains: Option<String>,

    /// Action applied on match
    pub action: SerializeErrorAction,
}

impl SerializeErrorRule {
    fn matches(&self, err: &SerializeError) -> bool {
        let kind_ok = self.kind.as_deref().is_none_or(|k| k == err.kind);
        let message_ok = self
            .message_contains
            .as_deref()
            .is_none_or(|m| err.message.contains(m));
        kind_ok && message_ok
    }
}

/// Ordered rule list; the first matching rule wins
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializeErrorRules {
    rules: Vec<SerializeErrorRule>,

    #[serde(default)]
    fallback: SerializeErrorAction,
}

impl SerializeErrorRules {
    /// Rules that apply `action` to every error
    pub fn always(action: SerializeErrorAction) -> Self {
        Self {
            rules: Vec::new(),
            fallback: action,
        }
    }

    /// Set the action for a kind, optionally narrowed by a message substring.
    ///
    /// Setting a kind without a message replaces every rule for that kind.
    /// Setting a kind with a message drops the kind-wide rule, if any.
    pub fn set(&mut self, kind: impl Into<String>, message: Option<String>, action: SerializeErrorAction) {
        let kind = kind.into();
        match &message {
            None => self.rules.retain(|r| r.kind.as_deref() != Some(kind.as_str())),
            Some(m) => self.rules.retain(|r| {
                !(r.kind.as_deref() == Some(kind.as_str())
                    && (r.message_contains.is_none() || r.message_contains.as_deref() == Some(m)))
            }),
        }
        self.rules.push(SerializeErrorRule {
            kind: Some(kind),
            message_contains: message,
            action,
        });
    }

    /// Set the action used when no rule matches
    pub fn set_fallback(&mut self, action: SerializeErrorAction) {
        self.fallback = action;
    }

    /// Resolve the action for an error
    pub fn resolve(&self, err: &SerializeError) -> SerializeErrorAction {
        self.rules
            .iter()
            .find(|r| r.matches(err))
            .map(|r| r.action)
            .unwrap_or(self.fallback)
    }
}

/// Short digest of the hashed part of a call's inputs.
///
/// Hex SHA-256 of the serializer's encoding of `{args, kwargs}`, characters 10..20.
pub fn input_hash(serializer: &dyn Serializer, inputs: &Inputs) -> Result<String, SerializeError> {
    let bytes = serializer.encode(&inputs.effective())?;
    let digest = format!("{:x}", Sha256::digest(&bytes));
    Ok(digest[10..20].to_string())
}

#[cfg(test)]
mod serializer_tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_and_yaml_decode_what_they_encode() {
        let value = json!({"b": [1, 2, {"c": null}], "a": "x"});
        for s in [&JsonSerializer as &dyn Serializer, &YamlSerializer] {
            let bytes = s.encode(&value).unwrap();
            assert_eq!(s.decode(&bytes).unwrap(), value, "serializer {}", s.name());
        }
    }

    #[test]
    fn test_decode_garbage_fails() {
        let err = JsonSerializer.decode(b"{not json").unwrap_err();
        assert_eq!(err.kind, "json");
    }

    #[test]
    fn test_input_hash_ignores_receiver() {
        let a = Inputs::from_args([json!("Hi")]).with_receiver(1).unwrap();
        let b = Inputs::from_args([json!("Hi")]).with_receiver(2).unwrap();
        let c = Inputs::from_args([json!("Bye")]);

        let ha = input_hash(&JsonSerializer, &a).unwrap();
        assert_eq!(ha.len(), 10);
        assert_eq!(ha, input_hash(&JsonSerializer, &b).unwrap());
        assert_ne!(ha, input_hash(&JsonSerializer, &c).unwrap());
    }

    #[test]
    fn test_rules_first_match_wins_with_warn_fallback() {
        let mut rules = SerializeErrorRules::default();
        let err = SerializeError::new("json", "can't encode socket");
        assert_eq!(rules.resolve(&err), SerializeErrorAction::Warn);

        rules.set("json", Some("socket".to_string()), SerializeErrorAction::Ignore);
        assert_eq!(rules.resolve(&err), SerializeErrorAction::Ignore);
        assert_eq!(
            rules.resolve(&SerializeError::new("json", "other")),
            SerializeErrorAction::Warn
        );

        rules.set("json", None, SerializeErrorAction::Raise);
        assert_eq!(rules.resolve(&err), SerializeErrorAction::Raise);
        assert_eq!(
            rules.resolve(&SerializeError::new("yaml", "socket")),
            SerializeErrorAction::Warn
        );
    }
}
