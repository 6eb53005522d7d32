//! Settings read from an optional `discoverx.toml`, overridden by
//! `DISCOVERX_*` environment variables (e.g. `DISCOVERX_THRESHOLD=0.9`).
//! Every key has a default, so neither source is required.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classify::{DEFAULT_TAG_PREFIX, DEFAULT_THRESHOLD};
use crate::error::{DiscoverxError, Result};
use crate::rules::{Rule, RuleInfo};
use crate::scan::DEFAULT_SAMPLE_SIZE;
use crate::sqlite::PersistenceMode;
use crate::store::DEFAULT_LOCATION;

pub const DEFAULT_FILE: &str = "discoverx.toml";
pub const ENVIRONMENT_PREFIX: &str = "DISCOVERX";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Frequency a rule must reach on a column for its tag to apply.
    pub threshold: f64,
    pub tag_prefix: String,
    /// Rows sampled per table. Zero scans whole tables.
    pub sample_size: usize,
    pub tag_location: String,
    pub max_concurrency: usize,
    pub custom_rules: Vec<RuleInfo>,
    /// SQLite file holding the tables to scan; in memory when unset.
    pub lake_path: Option<String>,
    /// SQLite file holding published tags; in memory when unset.
    pub store_path: Option<String>,
    pub bind_address: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            tag_prefix: DEFAULT_TAG_PREFIX.to_string(),
            sample_size: DEFAULT_SAMPLE_SIZE,
            tag_location: DEFAULT_LOCATION.to_string(),
            max_concurrency: 4,
            custom_rules: Vec::new(),
            lake_path: None,
            store_path: None,
            bind_address: "127.0.0.1:8080".to_string(),
        }
    }
}

impl Settings {
    /// Loads settings from `path`, or from `discoverx.toml` if it exists.
    /// An explicitly given file has to exist.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let settings: Settings = Config::builder()
            .add_source(File::with_name(path.unwrap_or(DEFAULT_FILE)).required(path.is_some()))
            .add_source(Environment::with_prefix(ENVIRONMENT_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        debug!(?settings, "loaded settings");
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(DiscoverxError::Config(format!(
                "threshold has to be in interval [0,1], given value is {}",
                self.threshold
            )));
        }
        if self.max_concurrency == 0 {
            return Err(DiscoverxError::Config("max_concurrency has to be at least 1".into()));
        }
        if self.tag_prefix.is_empty() {
            return Err(DiscoverxError::Config("tag_prefix cannot be empty".into()));
        }
        Ok(())
    }

    pub fn sample_size(&self) -> Option<usize> {
        (self.sample_size > 0).then_some(self.sample_size)
    }

    pub fn rules(&self) -> Result<Vec<Rule>> {
        self.custom_rules.iter().cloned().map(Rule::try_from).collect()
    }

    pub fn lake(&self) -> PersistenceMode {
        mode_of(&self.lake_path)
    }

    pub fn store(&self) -> PersistenceMode {
        mode_of(&self.store_path)
    }
}

fn mode_of(path: &Option<String>) -> PersistenceMode {
    match path {
        Some(path) => PersistenceMode::File(path.clone()),
        None => PersistenceMode::InMemory,
    }
}
