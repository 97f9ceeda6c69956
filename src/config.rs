//! Project configuration read from `.stepgate/stepgate.toml`.
//!
//! Layered file → environment → CLI. Every section is optional.
//!
//! ```toml
//! [store]
//! dir = ".stepgate"            # relative to the project directory
//!
//! [validation]
//! shell = "sh"
//! command_timeout_secs = 300
//! working_dir = "."
//!
//! [retry]
//! max_attempts_ceiling = 10
//!
//! [checkpoints]
//! mandatory_by_default = false
//!
//! [quality_gate]
//! on_block = "remain"          # or "fail"
//! ```

use crate::engine::EngineSettings;
use crate::plan::BlockBehavior;
use crate::validation::ShellEvaluator;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const STEPGATE_DIR: &str = ".stepgate";
pub const CONFIG_FILE: &str = "stepgate.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSection {
    /// Store root; relative paths resolve against the project directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSection {
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Per-command guard against hung checks
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

fn default_shell() -> String {
    "sh".to_string()
}

fn default_command_timeout_secs() -> u64 {
    300
}

impl Default for ValidationSection {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            command_timeout_secs: default_command_timeout_secs(),
            working_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySection {
    /// Plans asking for more attempts than this are rejected
    #[serde(default = "default_max_attempts_ceiling")]
    pub max_attempts_ceiling: u32,
}

fn default_max_attempts_ceiling() -> u32 {
    10
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts_ceiling: default_max_attempts_ceiling(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointsSection {
    #[serde(default)]
    pub mandatory_by_default: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityGateSection {
    #[serde(default)]
    pub on_block: BlockBehavior,
}

/// The complete stepgate.toml structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepgateToml {
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub validation: ValidationSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub checkpoints: CheckpointsSection,
    #[serde(default)]
    pub quality_gate: QualityGateSection,
}

impl StepgateToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse stepgate.toml")
    }

    /// Load `<stepgate_dir>/stepgate.toml`, or defaults when it does not exist.
    pub fn load_or_default(stepgate_dir: &Path) -> Result<Self> {
        let config_path = stepgate_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_toml()?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize stepgate.toml")
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.validation.shell.trim().is_empty() {
            warnings.push("validation.shell is empty; commands cannot run".to_string());
        }
        if self.validation.command_timeout_secs == 0 {
            warnings.push(
                "validation.command_timeout_secs = 0 makes every command predicate time out"
                    .to_string(),
            );
        }
        if self.retry.max_attempts_ceiling == 0 {
            warnings.push(
                "retry.max_attempts_ceiling = 0 rejects every plan; use at least 1".to_string(),
            );
        }
        if let Some(dir) = &self.validation.working_dir
            && dir.is_absolute()
            && !dir.exists()
        {
            warnings.push(format!(
                "validation.working_dir '{}' does not exist",
                dir.display()
            ));
        }

        warnings
    }
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    /// Holds stepgate.toml
    pub stepgate_dir: PathBuf,
    pub toml: StepgateToml,
    pub verbose: bool,
}

impl Config {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let stepgate_dir = project_dir.join(STEPGATE_DIR);
        let toml = StepgateToml::load_or_default(&stepgate_dir)?;

        Ok(Self {
            project_dir,
            stepgate_dir,
            toml,
            verbose: false,
        })
    }

    pub fn with_cli_args(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        Ok(config)
    }

    pub fn config_file(&self) -> PathBuf {
        self.stepgate_dir.join(CONFIG_FILE)
    }

    /// Store root (env `STEPGATE_HOME` → `[store] dir` → `.stepgate`).
    pub fn store_dir(&self) -> PathBuf {
        if let Ok(home) = std::env::var("STEPGATE_HOME")
            && !home.trim().is_empty()
        {
            return PathBuf::from(home);
        }
        match &self.toml.store.dir {
            Some(dir) => self.project_dir.join(dir),
            None => self.stepgate_dir.clone(),
        }
    }

    /// Shell for command predicates (env `STEPGATE_SHELL` → file → `sh`).
    pub fn shell(&self) -> String {
        std::env::var("STEPGATE_SHELL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| self.toml.validation.shell.clone())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.validation.command_timeout_secs)
    }

    /// Directory command predicates run in.
    pub fn working_dir(&self) -> PathBuf {
        match &self.toml.validation.working_dir {
            Some(dir) => self.project_dir.join(dir),
            None => self.project_dir.clone(),
        }
    }

    pub fn evaluator(&self) -> ShellEvaluator {
        ShellEvaluator::new(self.working_dir())
            .with_shell(self.shell())
            .with_timeout(self.command_timeout())
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            on_block: self.toml.quality_gate.on_block,
            mandatory_checkpoints: self.toml.checkpoints.mandatory_by_default,
            max_attempts_ceiling: self.toml.retry.max_attempts_ceiling,
        }
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = StepgateToml::parse("").unwrap();
        assert_eq!(config, StepgateToml::default());
        assert_eq!(config.validation.shell, "sh");
        assert_eq!(config.validation.command_timeout_secs, 300);
        assert_eq!(config.retry.max_attempts_ceiling, 10);
        assert!(!config.checkpoints.mandatory_by_default);
        assert_eq!(config.quality_gate.on_block, BlockBehavior::Remain);
    }

    #[test]
    fn test_parse_full_config() {
        let config = StepgateToml::parse(
            r#"
            [store]
            dir = "state"

            [validation]
            shell = "bash"
            command_timeout_secs = 30

            [checkpoints]
            mandatory_by_default = true

            [quality_gate]
            on_block = "fail"
            "#,
        )
        .unwrap();
        assert_eq!(config.store.dir, Some(PathBuf::from("state")));
        assert_eq!(config.validation.shell, "bash");
        assert_eq!(config.validation.command_timeout_secs, 30);
        assert!(config.checkpoints.mandatory_by_default);
        assert_eq!(config.quality_gate.on_block, BlockBehavior::Fail);
    }

    #[test]
    fn test_invalid_on_block_is_an_error() {
        assert!(StepgateToml::parse("[quality_gate]\non_block = \"explode\"").is_err());
    }

    #[test]
    fn test_validate_warns_on_degenerate_values() {
        let mut config = StepgateToml::default();
        assert!(config.validate().is_empty());

        config.validation.command_timeout_secs = 0;
        config.retry.max_attempts_ceiling = 0;
        let warnings = config.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("command_timeout_secs"));
    }

    #[test]
    fn test_load_or_default_and_save() {
        let dir = tempdir().unwrap();
        assert_eq!(
            StepgateToml::load_or_default(dir.path()).unwrap(),
            StepgateToml::default()
        );

        let mut config = StepgateToml::default();
        config.checkpoints.mandatory_by_default = true;
        config.save(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(StepgateToml::load_or_default(dir.path()).unwrap(), config);
    }

    #[test]
    fn test_resolved_paths_follow_file_settings() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(STEPGATE_DIR)).unwrap();
        std::fs::write(
            dir.path().join(STEPGATE_DIR).join(CONFIG_FILE),
            "[validation]\nworking_dir = \"app\"\n",
        )
        .unwrap();

        let config = Config::with_cli_args(dir.path().to_path_buf(), true).unwrap();
        assert!(config.verbose);
        assert!(config.working_dir().ends_with("app"));
        assert_eq!(config.engine_settings().max_attempts_ceiling, 10);
    }
}
