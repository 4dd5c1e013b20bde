//! Python virtual environments inside the sandbox.
//!
//! Activation is purely session state: the venv's binary directory is
//! remembered and [`crate::exec::derive_env`] puts it first on the child's
//! `PATH`. Nothing is sourced and the agent's own environment never changes.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{CoderError, Result};
use crate::exec::ProcessExecutor;
use crate::sandbox::Sandbox;
use crate::session::result::Output;
use crate::session::state::SessionState;

/// Subdirectory holding a venv's executables.
pub const BIN_DIR: &str = if cfg!(windows) { "Scripts" } else { "bin" };

const INTERPRETERS: [&str; 2] = ["python", "python.exe"];

pub struct VenvManager<'a> {
    sandbox: &'a Sandbox,
    executor: &'a ProcessExecutor,
}

impl<'a> VenvManager<'a> {
    pub fn new(sandbox: &'a Sandbox, executor: &'a ProcessExecutor) -> Self {
        Self { sandbox, executor }
    }

    /// Runs `<python> -m venv <dir>` in the session cwd.
    ///
    /// This is a session-triggered spawn, so it bypasses the allowlist but
    /// keeps the timeout.
    pub async fn create(&self, state: &SessionState, name: &str) -> Result<Output> {
        if !is_valid_name(name) {
            return Err(CoderError::InvalidParams {
                command: "create_venv".to_string(),
                reason: format!(
                    "invalid venv name '{name}' (allowed: letters, digits, '_', '.', '-')"
                ),
            });
        }

        let venv_dir = self.sandbox.resolve(name, state.cwd())?;
        match tokio::fs::symlink_metadata(&venv_dir).await {
            Ok(_) => return Err(CoderError::AlreadyExists(name.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(CoderError::io(&venv_dir, e)),
        }

        info!("Creating new venv in {}", venv_dir.display());
        let args = vec![
            "-m".to_string(),
            "venv".to_string(),
            venv_dir.to_string_lossy().into_owned(),
        ];
        let output = self
            .executor
            .spawn_internal(self.sandbox.python(), &args, state.cwd(), None)
            .await?;

        if output.return_code != 0 {
            warn!("venv creation failed ({}): {}", output.return_code, output.stderr.trim());
            return Err(CoderError::VenvCreationFailed(output.stderr.trim().to_string()));
        }

        Ok(Output::Venv {
            message: format!("Venv '{name}' created. Activate it with: activate_venv {name}"),
            path: self.sandbox.display_relative(&venv_dir),
        })
    }

    /// Records the venv's binary directory for later `run` commands.
    pub async fn activate(&self, state: &mut SessionState, name: &str) -> Result<Output> {
        let venv_dir = self.sandbox.resolve(name, state.cwd())?;
        match tokio::fs::metadata(&venv_dir).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(CoderError::NotADirectory(name.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CoderError::NotFound(name.to_string()))
            }
            Err(e) => return Err(CoderError::io(&venv_dir, e)),
        }

        let bin = venv_bin_dir(&venv_dir)
            .await
            .ok_or_else(|| CoderError::VenvInvalid(name.to_string()))?;
        // The interpreter may itself be a symlink out of the sandbox (venvs
        // link to the base python); only the directory must stay inside.
        if !bin.starts_with(self.sandbox.root()) {
            return Err(CoderError::PathTraversalDenied(name.to_string()));
        }

        let relative = self.sandbox.display_relative(&venv_dir);
        info!("Venv {relative} is now active");
        state.set_active_venv_bin(Some(bin));

        Ok(Output::Venv {
            message: format!("Venv '{relative}' is now active for this session."),
            path: relative,
        })
    }

    pub fn deactivate(&self, state: &mut SessionState) -> Output {
        let was_active = state.active_venv_bin().is_some();
        state.set_active_venv_bin(None);
        if was_active {
            info!("Venv deactivated");
            Output::message("Venv deactivated.")
        } else {
            Output::message("No venv was active.")
        }
    }
}

/// Returns the canonical binary directory if it holds a python executable.
async fn venv_bin_dir(venv_dir: &Path) -> Option<PathBuf> {
    let bin = venv_dir.join(BIN_DIR);
    for interpreter in INTERPRETERS {
        if tokio::fs::metadata(bin.join(interpreter)).await.is_ok() {
            return tokio::fs::canonicalize(&bin).await.ok();
        }
    }
    None
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
        && name != "."
        && name != ".."
}

/// Human-readable venv name for prompts: the directory above `bin`.
pub fn venv_label(bin: &Path) -> String {
    bin.parent()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
