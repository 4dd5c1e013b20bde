use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    /// Jail directory. Created on startup if missing.
    /// Supports ${ENV_VAR} substitution
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Program names `run` may launch (exact match on the first token)
    #[serde(default)]
    pub allowed_commands: Vec<String>,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    /// Interpreter used by `create_venv` (`<python> -m venv <dir>`)
    #[serde(default = "default_python")]
    pub python: String,
}

fn default_root() -> PathBuf {
    PathBuf::from("./agent_workspace")
}

fn default_command_timeout() -> u64 {
    60
}

fn default_python() -> String {
    if cfg!(windows) {
        "python".to_string()
    } else {
        "python3".to_string()
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            allowed_commands: Vec::new(),
            command_timeout_secs: default_command_timeout(),
            python: default_python(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses TOML after expanding environment variables like ${HOME}
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let expanded = shellexpand::env(content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }
}
