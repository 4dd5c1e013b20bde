//! Command names, their parameters, and parsing from a JSON parameter map.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::error::{CoderError, Result};

/// Every command a session understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Ls,
    Cd,
    Read,
    Write,
    Mkdir,
    Rm,
    CreateVenv,
    ActivateVenv,
    DeactivateVenv,
    Run,
    ToggleAutonomousMode,
    Help,
    Status,
}

impl CommandKind {
    pub const ALL: [CommandKind; 13] = [
        Self::Ls,
        Self::Cd,
        Self::Read,
        Self::Write,
        Self::Mkdir,
        Self::Rm,
        Self::CreateVenv,
        Self::ActivateVenv,
        Self::DeactivateVenv,
        Self::Run,
        Self::ToggleAutonomousMode,
        Self::Help,
        Self::Status,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Ls => "ls",
            Self::Cd => "cd",
            Self::Read => "read",
            Self::Write => "write",
            Self::Mkdir => "mkdir",
            Self::Rm => "rm",
            Self::CreateVenv => "create_venv",
            Self::ActivateVenv => "activate_venv",
            Self::DeactivateVenv => "deactivate_venv",
            Self::Run => "run",
            Self::ToggleAutonomousMode => "toggle_autonomous_mode",
            Self::Help => "help",
            Self::Status => "status",
        }
    }

    pub fn usage(self) -> &'static str {
        match self {
            Self::Ls => "ls [path]",
            Self::Cd => "cd <path>",
            Self::Read => "read <path>",
            Self::Write => "write <path> <content>",
            Self::Mkdir => "mkdir <path>",
            Self::Rm => "rm <path>",
            Self::CreateVenv => "create_venv <name>",
            Self::ActivateVenv => "activate_venv <name>",
            Self::DeactivateVenv => "deactivate_venv",
            Self::Run => "run <command line>",
            Self::ToggleAutonomousMode => "toggle_autonomous_mode",
            Self::Help => "help",
            Self::Status => "status",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Ls => "List files and directories",
            Self::Cd => "Change the session's working directory",
            Self::Read => "Read the content of a text file",
            Self::Write => "Write content to a file, creating parent directories",
            Self::Mkdir => "Create a directory, including parents",
            Self::Rm => "Delete a file (requires autonomous mode)",
            Self::CreateVenv => "Create a Python virtual environment",
            Self::ActivateVenv => "Use a venv for subsequent `run` commands",
            Self::DeactivateVenv => "Stop using the active venv",
            Self::Run => "Run an allowlisted program (no shell)",
            Self::ToggleAutonomousMode => "Toggle the safety switch for destructive operations",
            Self::Help => "Show available commands",
            Self::Status => "Show session state",
        }
    }

    /// Comma-separated list of command names, for error messages.
    pub fn available() -> String {
        Self::ALL
            .iter()
            .map(|kind| kind.name())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// One line per command, for `help`.
    pub fn help_text() -> String {
        let mut text = String::from("Sandboxed session commands:\n");
        for kind in Self::ALL {
            text.push_str(&format!("  {:<28} {}\n", kind.usage(), kind.description()));
        }
        text
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CommandKind {
    type Err = CoderError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| CoderError::UnknownCommand {
                command: s.to_string(),
                available: Self::available(),
            })
    }
}

/// A command with its arguments validated.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Ls { path: String },
    Cd { path: String },
    Read { path: String },
    Write { path: String, content: String },
    Mkdir { path: String },
    Rm { path: String },
    CreateVenv { name: String },
    ActivateVenv { name: String },
    DeactivateVenv,
    Run { command_line: String },
    ToggleAutonomousMode,
    Help,
    Status,
}

impl Command {
    /// Builds a command from its parameter map. The `command` key, if still
    /// present, is ignored; any other unknown key is an error.
    pub fn parse(kind: CommandKind, mut params: Map<String, Value>) -> Result<Self> {
        params.remove("command");
        let mut args = Args { kind, params };

        let command = match kind {
            CommandKind::Ls => Self::Ls {
                path: args.optional(&["path"])?.unwrap_or_else(|| ".".to_string()),
            },
            CommandKind::Cd => Self::Cd {
                path: args.required(&["path"])?,
            },
            CommandKind::Read => Self::Read {
                path: args.required(&["path"])?,
            },
            CommandKind::Write => Self::Write {
                path: args.required(&["path"])?,
                content: args.required(&["content"])?,
            },
            CommandKind::Mkdir => Self::Mkdir {
                path: args.required(&["path"])?,
            },
            CommandKind::Rm => Self::Rm {
                path: args.required(&["path"])?,
            },
            CommandKind::CreateVenv => Self::CreateVenv {
                name: args.required(&["name", "venv_name"])?,
            },
            CommandKind::ActivateVenv => Self::ActivateVenv {
                name: args.required(&["name", "venv_name"])?,
            },
            CommandKind::DeactivateVenv => Self::DeactivateVenv,
            CommandKind::Run => Self::Run {
                command_line: args.required(&["command_line", "command_str"])?,
            },
            CommandKind::ToggleAutonomousMode => Self::ToggleAutonomousMode,
            CommandKind::Help => Self::Help,
            CommandKind::Status => Self::Status,
        };

        args.finish()?;
        Ok(command)
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Ls { .. } => CommandKind::Ls,
            Self::Cd { .. } => CommandKind::Cd,
            Self::Read { .. } => CommandKind::Read,
            Self::Write { .. } => CommandKind::Write,
            Self::Mkdir { .. } => CommandKind::Mkdir,
            Self::Rm { .. } => CommandKind::Rm,
            Self::CreateVenv { .. } => CommandKind::CreateVenv,
            Self::ActivateVenv { .. } => CommandKind::ActivateVenv,
            Self::DeactivateVenv => CommandKind::DeactivateVenv,
            Self::Run { .. } => CommandKind::Run,
            Self::ToggleAutonomousMode => CommandKind::ToggleAutonomousMode,
            Self::Help => CommandKind::Help,
            Self::Status => CommandKind::Status,
        }
    }
}

/// Consumes parameters one by one so leftovers can be reported.
struct Args {
    kind: CommandKind,
    params: Map<String, Value>,
}

impl Args {
    /// Takes the first present key among `names` (canonical name first,
    /// then accepted aliases).
    fn optional(&mut self, names: &[&str]) -> Result<Option<String>> {
        for name in names {
            if let Some(value) = self.params.remove(*name) {
                return match value {
                    Value::String(s) => Ok(Some(s)),
                    other => Err(self.invalid(format!(
                        "parameter '{name}' must be a string, got {other}"
                    ))),
                };
            }
        }
        Ok(None)
    }

    fn required(&mut self, names: &[&str]) -> Result<String> {
        let canonical = names.first().copied().unwrap_or_default();
        self.optional(names)?
            .ok_or_else(|| self.invalid(format!("missing required parameter '{canonical}'")))
    }

    fn finish(self) -> Result<()> {
        if self.params.is_empty() {
            return Ok(());
        }
        let unexpected: Vec<&str> = self.params.keys().map(String::as_str).collect();
        Err(self.invalid(format!(
            "unexpected parameter(s): {}",
            unexpected.join(", ")
        )))
    }

    fn invalid(&self, reason: String) -> CoderError {
        CoderError::InvalidParams {
            command: self.kind.name().to_string(),
            reason,
        }
    }
}
