//! Stage model and configuration loading
//!
//! A stage is a named deployment target with an ordered list of command
//! templates and policy flags. Stages are immutable for the duration of a
//! deploy; configuration management beyond loading a JSON file is out of
//! scope.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

fn default_command_timeout_secs() -> u64 {
    2 * 60 * 60
}

/// A deployment target: name, policy flags, and the ordered command sequence
/// executed for each deploy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    /// Stage name, unique within a configuration
    pub name: String,
    /// Whether this stage serves production traffic
    #[serde(default)]
    pub production: bool,
    /// Whether deploys to this stage always require buddy approval,
    /// regardless of the production flag
    #[serde(default)]
    pub confirm: bool,
    /// Command templates executed in order; each is split with shell-words
    /// rules at execution time
    pub commands: Vec<String>,
    /// Wall-clock timeout applied to each command
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl Stage {
    /// Create a non-production stage with default policy flags.
    pub fn new(name: impl Into<String>, commands: Vec<String>) -> Self {
        Self {
            name: name.into(),
            production: false,
            confirm: false,
            commands,
            command_timeout_secs: default_command_timeout_secs(),
        }
    }

    /// Create a production stage (buddy approval required by the default policy).
    pub fn production(name: impl Into<String>, commands: Vec<String>) -> Self {
        Self {
            production: true,
            ..Self::new(name, commands)
        }
    }

    /// Per-command timeout as a [`Duration`].
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Validate the stage: non-blank name, at least one command, and every
    /// command template must split cleanly into a program and arguments.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "stage name must not be blank".to_string(),
            });
        }
        if self.commands.is_empty() {
            return Err(ConfigError::Validation {
                message: format!("stage '{}' has no commands", self.name),
            });
        }
        for command in &self.commands {
            let words = shell_words::split(command).map_err(|e| ConfigError::Validation {
                message: format!("stage '{}' has an unparsable command '{}': {}", self.name, command, e),
            })?;
            if words.is_empty() {
                return Err(ConfigError::Validation {
                    message: format!("stage '{}' has a blank command", self.name),
                });
            }
        }
        Ok(())
    }
}

/// A set of stages loaded from a JSON configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub stages: Vec<Stage>,
}

impl StageConfig {
    /// Load and validate a stage configuration from a JSON file.
    pub fn from_json(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.display().to_string(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        let config: StageConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every stage and reject duplicate names.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for stage in &self.stages {
            stage.validate()?;
        }
        for (i, stage) in self.stages.iter().enumerate() {
            if self.stages[..i].iter().any(|s| s.name == stage.name) {
                return Err(ConfigError::Validation {
                    message: format!("duplicate stage name '{}'", stage.name),
                });
            }
        }
        Ok(())
    }

    /// Find a stage by name.
    pub fn find(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }
}
