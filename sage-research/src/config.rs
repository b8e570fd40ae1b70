//! Pipeline settings and collaborator key resolution for sage-research
//!
//! The bootstrap TOML file carries two research sections next to the
//! shared keys read by `sage_common::config`:
//!
//! ```toml
//! [pipeline]
//! preset = "lightweight"
//! max_documents_for_analysis = 15
//!
//! [prefilter]
//! preset = "safe"
//!
//! [prefilter.thresholds]
//! relevance_min = 0.6
//! ```
//!
//! A section's `preset` picks the base values; any other key in the section
//! overrides that base field by field.

use sage_common::config::{ProviderEndpoint, TomlConfig};
use sage_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use toml::{Table, Value};
use tracing::{info, warn};

use crate::models::{PipelineConfig, PreFilterConfig};

/// Named starting point for a settings section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    #[default]
    Default,
    Safe,
    Lightweight,
}

impl Preset {
    fn pipeline(self) -> Result<PipelineConfig> {
        match self {
            Preset::Default => Ok(PipelineConfig::default()),
            Preset::Lightweight => Ok(PipelineConfig::lightweight()),
            Preset::Safe => Err(Error::Config("pipeline has no 'safe' preset".to_string())),
        }
    }

    fn prefilter(self) -> PreFilterConfig {
        match self {
            Preset::Default => PreFilterConfig::default(),
            Preset::Safe => PreFilterConfig::safe(),
            Preset::Lightweight => PreFilterConfig::lightweight(),
        }
    }
}

/// Pipeline tuning read from the bootstrap file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchSettings {
    pub pipeline: PipelineConfig,
    pub prefilter: PreFilterConfig,
}

impl ResearchSettings {
    /// Read the `[pipeline]` and `[prefilter]` sections of `path`
    ///
    /// A missing file yields defaults; a malformed or invalid one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let settings = Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        info!(
            path = %path.display(),
            prefilter_enabled = settings.pipeline.enable_prefilter,
            safe_mode = settings.prefilter.safe_mode,
            "Loaded research settings"
        );
        Ok(settings)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let root: Table = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;

        let (pipeline_preset, pipeline_overrides) = split_section(&root, "pipeline")?;
        let pipeline = apply_overrides(pipeline_preset.pipeline()?, pipeline_overrides, "pipeline")?;

        let (prefilter_preset, prefilter_overrides) = split_section(&root, "prefilter")?;
        let prefilter = apply_overrides(prefilter_preset.prefilter(), prefilter_overrides, "prefilter")?;

        let settings = Self { pipeline, prefilter };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.pipeline.validate()?;
        self.prefilter.validate()?;
        Ok(())
    }
}

/// Section table without its `preset` key, plus the parsed preset
fn split_section(root: &Table, name: &str) -> Result<(Preset, Table)> {
    let mut section = match root.get(name) {
        None => return Ok((Preset::Default, Table::new())),
        Some(Value::Table(table)) => table.clone(),
        Some(_) => return Err(Error::Config(format!("[{}] must be a table", name))),
    };

    let preset = match section.remove("preset") {
        None => Preset::Default,
        Some(value) => value
            .try_into()
            .map_err(|e| Error::Config(format!("{}.preset: {}", name, e)))?,
    };
    Ok((preset, section))
}

fn apply_overrides<T>(base: T, overrides: Table, name: &str) -> Result<T>
where
    T: Serialize + for<'de> Deserialize<'de>,
{
    let mut merged = match Value::try_from(base) {
        Ok(Value::Table(table)) => table,
        Ok(_) => return Err(Error::Config(format!("[{}] did not serialize to a table", name))),
        Err(e) => return Err(Error::Config(format!("{}: {}", name, e))),
    };
    merge_tables(&mut merged, overrides);
    Value::Table(merged)
        .try_into()
        .map_err(|e| Error::Config(format!("[{}]: {}", name, e)))
}

/// Recursive merge; nested tables merge key by key, everything else replaces
fn merge_tables(base: &mut Table, overrides: Table) {
    for (key, value) in overrides {
        match (base.get_mut(&key), value) {
            (Some(Value::Table(existing)), Value::Table(nested)) => merge_tables(existing, nested),
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Where a collaborator API key was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Environment,
    Toml,
    Missing,
}

/// Report which source supplies an endpoint's API key
///
/// The environment wins over TOML; both being set is logged as a likely
/// misconfiguration.
pub fn api_key_source(name: &str, endpoint: &ProviderEndpoint, env_var_name: &str) -> KeySource {
    let env_key = std::env::var(env_var_name).ok().filter(|k| is_valid_key(k));
    let toml_key = endpoint.api_key.as_deref().filter(|k| is_valid_key(k));

    if env_key.is_some() && toml_key.is_some() {
        warn!(
            collaborator = name,
            env_var = env_var_name,
            "API key found in both environment and TOML config, using environment"
        );
    }

    match (env_key, toml_key) {
        (Some(_), _) => {
            info!(collaborator = name, "API key loaded from environment variable");
            KeySource::Environment
        }
        (None, Some(_)) => {
            info!(collaborator = name, "API key loaded from TOML config");
            KeySource::Toml
        }
        (None, None) => KeySource::Missing,
    }
}

/// Log how each collaborator is configured
pub fn log_collaborators(config: &TomlConfig) {
    use sage_common::config::{SCORING_API_KEY_ENV, SEARCH_API_KEY_ENV};

    for (name, endpoint, env) in [
        ("search", &config.search, SEARCH_API_KEY_ENV),
        ("scoring", &config.scoring, SCORING_API_KEY_ENV),
    ] {
        match &endpoint.base_url {
            Some(url) => {
                let source = api_key_source(name, endpoint, env);
                info!(
                    collaborator = name,
                    base_url = %url,
                    key_source = ?source,
                    requests_per_second = endpoint.requests_per_second,
                    "Collaborator configured"
                );
            }
            None => warn!(
                collaborator = name,
                "No base_url configured, calls will fail and fall back where possible"
            ),
        }
    }
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}
