//! Project configuration read from `.phasekeep/phasekeep.toml`.
//!
//! Every section is optional; missing values fall back to defaults.
//!
//! ```toml
//! [project]
//! prefix = "WRK"
//!
//! [execution]
//! max_wip = 3
//! max_exclusive = 1
//! lock_timeout_secs = 5
//! default_pipeline = "feature"
//!
//! [pipelines.hotfix]
//! pre_phases = []
//! phases = [{ name = "build", destructive = true }, { name = "review" }]
//! ```

use crate::coordinator::{CoordinatorSettings, DEFAULT_ID_PREFIX};
use crate::init::STORE_DIR;
use crate::pipeline::{DEFAULT_PIPELINE, PipelineConfig, PipelineSet};
use crate::scheduler::ExecutionLimits;
use crate::store::FileStore;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "phasekeep.toml";

/// Project-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSection {
    /// Prefix for newly allocated item IDs
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_prefix() -> String {
    DEFAULT_ID_PREFIX.to_string()
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
        }
    }
}

/// Scheduling and store limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSection {
    /// Maximum number of items with a phase running at once
    #[serde(default = "default_max_wip")]
    pub max_wip: usize,
    /// Maximum number of destructive phases running at once
    #[serde(default = "default_max_exclusive")]
    pub max_exclusive: usize,
    /// Bounded wait for the store lock
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
    /// Pipeline used by items without a pipeline type
    #[serde(default = "default_pipeline")]
    pub default_pipeline: String,
}

fn default_max_wip() -> usize {
    ExecutionLimits::default().max_wip
}

fn default_max_exclusive() -> usize {
    ExecutionLimits::default().max_exclusive
}

fn default_lock_timeout_secs() -> u64 {
    5
}

fn default_pipeline() -> String {
    DEFAULT_PIPELINE.to_string()
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            max_wip: default_max_wip(),
            max_exclusive: default_max_exclusive(),
            lock_timeout_secs: default_lock_timeout_secs(),
            default_pipeline: default_pipeline(),
        }
    }
}

/// The complete phasekeep.toml structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhasekeepToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub execution: ExecutionSection,
    /// Named pipelines; `feature` is built in unless redefined here
    #[serde(default)]
    pub pipelines: BTreeMap<String, PipelineConfig>,
}

impl PhasekeepToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse phasekeep.toml")
    }

    /// Load `phasekeep.toml` from the store directory, or defaults when it
    /// does not exist.
    pub fn load_or_default(store_dir: &Path) -> Result<Self> {
        let config_path = store_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize phasekeep.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn pipeline_set(&self) -> PipelineSet {
        PipelineSet::new(&self.execution.default_pipeline, self.pipelines.clone())
    }

    pub fn limits(&self) -> ExecutionLimits {
        ExecutionLimits::default()
            .with_max_wip(self.execution.max_wip)
            .with_max_exclusive(self.execution.max_exclusive)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.execution.lock_timeout_secs)
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        let prefix = &self.project.prefix;
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
            warnings.push(format!(
                "Invalid ID prefix '{}': use ASCII letters and digits only",
                prefix
            ));
        }
        if self.execution.max_wip == 0 {
            warnings.push("max_wip is 0: no phase will ever be scheduled".to_string());
        }
        if self.execution.max_exclusive == 0 {
            warnings
                .push("max_exclusive is 0: destructive phases will never be scheduled".to_string());
        }
        if self.execution.max_exclusive > self.execution.max_wip {
            warnings.push(format!(
                "max_exclusive ({}) exceeds max_wip ({})",
                self.execution.max_exclusive, self.execution.max_wip
            ));
        }
        if self.execution.lock_timeout_secs == 0 {
            warnings.push("lock_timeout_secs is 0: contended locks fail immediately".to_string());
        }

        warnings.extend(self.pipeline_set().validate());
        warnings
    }
}

/// Resolved runtime configuration: file settings plus CLI overrides.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub store_dir: PathBuf,
    pub toml: PhasekeepToml,
    pub verbose: bool,
}

impl Config {
    pub fn new(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let store_dir = project_dir.join(STORE_DIR);
        let toml = PhasekeepToml::load_or_default(&store_dir)?;

        Ok(Self {
            project_dir,
            store_dir,
            toml,
            verbose,
        })
    }

    pub fn config_file(&self) -> PathBuf {
        self.store_dir.join(CONFIG_FILE)
    }

    pub fn store(&self) -> FileStore {
        FileStore::new(&self.store_dir).with_lock_timeout(self.toml.lock_timeout())
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings::default()
            .with_id_prefix(&self.toml.project.prefix)
            .with_pipelines(self.toml.pipeline_set())
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PhaseConfig;
    use tempfile::tempdir;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = PhasekeepToml::parse("").unwrap();
        assert_eq!(config, PhasekeepToml::default());
        assert_eq!(config.project.prefix, "WRK");
        assert_eq!(config.execution.max_wip, 3);
        assert_eq!(config.execution.max_exclusive, 1);
        assert_eq!(config.lock_timeout(), Duration::from_secs(5));
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let config = PhasekeepToml::parse(
            r#"
            [project]
            prefix = "OPS"

            [execution]
            max_wip = 5
            max_exclusive = 2
            default_pipeline = "hotfix"

            [pipelines.hotfix]
            phases = [{ name = "build", destructive = true }, { name = "review" }]
            "#,
        )
        .unwrap();

        assert_eq!(config.project.prefix, "OPS");
        assert_eq!(config.limits().max_wip, 5);
        assert_eq!(config.limits().max_exclusive, 2);
        assert_eq!(config.execution.lock_timeout_secs, 5);

        let pipelines = config.pipeline_set();
        assert_eq!(pipelines.default_name(), "hotfix");
        let hotfix = pipelines.get("hotfix").unwrap();
        assert!(hotfix.pre_phases.is_empty());
        assert_eq!(
            hotfix.phases,
            vec![PhaseConfig::destructive("build"), PhaseConfig::new("review")]
        );
        // The built-in pipeline stays available.
        assert!(pipelines.get("feature").is_some());
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_invalid_toml() {
        let err = PhasekeepToml::parse("[execution\nmax_wip = ").unwrap_err();
        assert!(err.to_string().contains("Failed to parse phasekeep.toml"));
    }

    #[test]
    fn test_validate_reports_problems() {
        let mut config = PhasekeepToml::default();
        config.project.prefix = "WR-K".to_string();
        config.execution.max_wip = 0;
        config.execution.default_pipeline = "missing".to_string();

        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.contains("Invalid ID prefix")));
        assert!(warnings.iter().any(|w| w.contains("max_wip is 0")));
        assert!(warnings.iter().any(|w| w.contains("exceeds max_wip")));
        assert!(warnings.iter().any(|w| w.contains("'missing' is not defined")));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut config = PhasekeepToml::default();
        config.execution.max_wip = 7;
        config.save(&path).unwrap();

        let loaded = PhasekeepToml::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempdir().unwrap();
        let config = PhasekeepToml::load_or_default(dir.path()).unwrap();
        assert_eq!(config, PhasekeepToml::default());
    }

    #[test]
    fn test_runtime_config_resolves_paths() {
        let dir = tempdir().unwrap();
        let store_dir = dir.path().join(STORE_DIR);
        std::fs::create_dir_all(&store_dir).unwrap();
        std::fs::write(store_dir.join(CONFIG_FILE), "[project]\nprefix = \"OPS\"\n").unwrap();

        let config = Config::new(dir.path().to_path_buf(), true).unwrap();
        assert!(config.verbose);
        assert_eq!(config.store_dir, dir.path().canonicalize().unwrap().join(STORE_DIR));
        assert_eq!(config.coordinator_settings().id_prefix, "OPS");
        assert_eq!(config.store().root(), config.store_dir.as_path());
    }
}
