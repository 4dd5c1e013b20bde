//! The jail every session runs in.
//!
//! A [`Sandbox`] is the read-only part of the security model and is shared
//! by all sessions through an `Arc`:
//!
//! 1. Canonical root directory — nothing outside it is read, written or used as cwd
//! 2. Allowlist — the only program names `run` may launch
//! 3. Execution timeout — children are killed when it expires
//!
//! Per-session mutable state lives in [`crate::session::SessionState`].

pub mod resolver;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::info;

use crate::config::SandboxConfig;

/// Immutable set of program names `run` is allowed to spawn.
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    programs: BTreeSet<String>,
}

impl Allowlist {
    pub fn new<I, S>(programs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            programs: programs.into_iter().map(Into::into).collect(),
        }
    }

    /// Exact match on the program token, no path or case folding.
    pub fn permits(&self, program: &str) -> bool {
        self.programs.contains(program)
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.programs.iter().map(String::as_str)
    }
}

#[derive(Debug)]
pub struct Sandbox {
    root: PathBuf,
    allowlist: Allowlist,
    command_timeout: Duration,
    python: String,
}

impl Sandbox {
    /// Creates the root directory if needed and pins its canonical path.
    pub fn new(config: &SandboxConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.root).with_context(|| {
            format!("Cannot create sandbox directory {}", config.root.display())
        })?;
        let root = config
            .root
            .canonicalize()
            .with_context(|| format!("Cannot resolve sandbox directory {}", config.root.display()))?;

        if root.parent().is_none() {
            return Err(anyhow!(
                "Insecure sandbox root '{}': refusing to jail a session at the filesystem root",
                config.root.display()
            ));
        }

        let allowlist = Allowlist::new(config.allowed_commands.iter().cloned());
        info!(
            "Sandbox jail at {} ({} allowed commands, {}s timeout)",
            root.display(),
            config.allowed_commands.len(),
            config.command_timeout_secs
        );

        Ok(Self {
            root,
            allowlist,
            command_timeout: Duration::from_secs(config.command_timeout_secs),
            python: config.python.clone(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn allowlist(&self) -> &Allowlist {
        &self.allowlist
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Interpreter used to create virtual environments
    pub fn python(&self) -> &str {
        &self.python
    }

    /// Resolves a caller path against `cwd`, denying anything outside the root.
    pub fn resolve(&self, raw: &str, cwd: &Path) -> crate::error::Result<PathBuf> {
        resolver::resolve(raw, cwd, &self.root)
    }

    /// Renders `path` as `./relative` for messages shown to the caller.
    pub fn display_relative(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => format!("./{}", rel.to_string_lossy().replace('\\', "/")),
            Err(_) => path.display().to_string(),
        }
    }
}
