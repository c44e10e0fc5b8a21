//! Configuration for the rewind engine
//!
//! Values are layered with `figment`:
//! 1. Built-in defaults
//! 2. `rewind.toml` in the working directory
//! 3. `REWIND_`-prefixed environment variables (`REWIND_MODE=replay`, `REWIND_QUOTA_MAX_COUNT=10`)
//!    `REWIND_MODE` accepts any case and the aliases `case`, `test` and `off`
//! 4. The file named by `REWIND_CONFIG_PATH`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{Result, RewindError};
use crate::quota::{QuotaLimit, QuotaManager};
use crate::registry::{OnDuplicate, Registry};
use crate::session::Mode;
use crate::store::{ArtifactStore, SerializeErrorAction, SerializeErrorRules, SerializerKind};

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewindConfig {
    /// Artifact root directory
    pub root: PathBuf,

    /// Interception mode for new sessions
    pub mode: Mode,

    /// Replay recorded subtrees from fast-path fixtures
    pub fast_path: bool,

    /// Read back and compare every outcome after writing it
    pub verify_on_record: bool,

    /// Artifact serializer
    pub serializer: SerializerKind,

    /// Action when an artifact cannot be serialized and no rule matches
    pub on_serialize_error: SerializeErrorAction,

    /// Default duplicate-registration policy
    pub on_duplicate: OnDuplicate,

    /// Recording quota
    pub quota: QuotaConfig,
}

impl Default for RewindConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".rewind"),
            mode: Mode::Disabled,
            fast_path: false,
            verify_on_record: false,
            serializer: SerializerKind::Json,
            on_serialize_error: SerializeErrorAction::Warn,
            on_duplicate: OnDuplicate::Raise,
            quota: QuotaConfig::default(),
        }
    }
}

/// Recording quota configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Maximum retained cases per function; unbounded when unset
    pub max_count: Option<usize>,
}

impl RewindConfig {
    /// Load configuration from defaults, `rewind.toml`, the environment and `REWIND_CONFIG_PATH`.
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source is invalid.
    pub fn load() -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(RewindConfig::default()))
            .merge(Toml::file("rewind.toml"))
            .merge(Env::prefixed("REWIND_").ignore(&["CONFIG_PATH", "MODE"]).map(|key| {
                key.as_str().replacen("quota_", "quota.", 1).into()
            }));

        if let Ok(path) = std::env::var("REWIND_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let mut config: RewindConfig = figment
            .extract()
            .map_err(|e| RewindError::Configuration(format!("Failed to load configuration: {}", e)))?;

        // REWIND_MODE is parsed leniently (any case, `case`/`test` aliases)
        if let Some(mode) = Mode::from_env()? {
            config.mode = mode;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific TOML file on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let path = path.as_ref();
        if !path.is_file() {
            return Err(RewindError::Configuration(format!(
                "Configuration file {} not found",
                path.display()
            )));
        }

        let config: RewindConfig = Figment::from(Serialized::defaults(RewindConfig::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| RewindError::Configuration(format!("Failed to load configuration file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Start a builder from the defaults
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    fn validate(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            return Err(RewindError::Configuration("root must not be empty".to_string()));
        }
        Ok(())
    }

    /// Build the artifact store described by this configuration
    pub fn store(&self) -> ArtifactStore {
        ArtifactStore::new(&self.root)
            .with_serializer(self.serializer.build())
            .with_error_rules(SerializeErrorRules::always(self.on_serialize_error))
            .with_verify_on_record(self.verify_on_record)
    }

    /// Build a quota manager with this configuration's default
    pub fn quota_manager(&self) -> Arc<QuotaManager> {
        Arc::new(QuotaManager::with_default(QuotaLimit::from(self.quota.max_count)))
    }

    /// Build an empty registry with this configuration's duplicate policy
    pub fn registry(&self) -> Registry {
        let registry = Registry::new();
        registry.set_default_on_duplicate(self.on_duplicate);
        registry
    }
}

/// Builder for [`RewindConfig`]
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: RewindConfig,
}

impl ConfigBuilder {
    /// Set the artifact root
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.root = root.into();
        self
    }

    /// Set the mode
    pub fn mode(mut self, mode: Mode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Enable or disable the fast path
    pub fn fast_path(mut self, enabled: bool) -> Self {
        self.config.fast_path = enabled;
        self
    }

    /// Enable or disable read-back verification
    pub fn verify_on_record(mut self, enabled: bool) -> Self {
        self.config.verify_on_record = enabled;
        self
    }

    /// Set the serializer
    pub fn serializer(mut self, kind: SerializerKind) -> Self {
        self.config.serializer = kind;
        self
    }

    /// Set the fallback serialization-failure action
    pub fn on_serialize_error(mut self, action: SerializeErrorAction) -> Self {
        self.config.on_serialize_error = action;
        self
    }

    /// Set the default duplicate policy
    pub fn on_duplicate(mut self, policy: OnDuplicate) -> Self {
        self.config.on_duplicate = policy;
        self
    }

    /// Set the default quota
    pub fn max_count(mut self, max: Option<usize>) -> Self {
        self.config.quota.max_count = max;
        self
    }

    /// Finish
    pub fn build(self) -> Result<RewindConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
