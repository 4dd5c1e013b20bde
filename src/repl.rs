//! Line parsing for the interactive CLI.
//!
//! `exit`/`quit` and `help` are session-control words handled by the CLI
//! itself; everything else becomes a [`CommandRequest`] for the dispatcher.

use serde_json::{Map, Value};

use crate::sandbox::Sandbox;
use crate::session::{CommandRequest, SessionState};
use crate::venv::venv_label;

#[derive(Debug, Clone, PartialEq)]
pub enum ReplInput {
    Empty,
    Exit,
    Help,
    Command(CommandRequest),
}

/// Maps a typed line onto a request, positional arguments included.
///
/// `run` keeps the rest of the line verbatim so its quoting reaches the
/// tokenizer untouched; `write` takes the path then the remaining words as
/// content; other commands take at most one path/name argument.
pub fn parse_line(line: &str) -> Result<ReplInput, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(ReplInput::Empty);
    }

    let (name, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim_start()),
        None => (trimmed, ""),
    };

    match name.to_lowercase().as_str() {
        "exit" | "quit" => return Ok(ReplInput::Exit),
        "help" => return Ok(ReplInput::Help),
        _ => {}
    }

    let mut params = Map::new();
    match name {
        "run" => {
            if !rest.is_empty() {
                params.insert("command_line".to_string(), Value::String(rest.to_string()));
            }
        }
        _ => {
            let args = shlex::split(rest).ok_or_else(|| "unbalanced quotes".to_string())?;
            match (name, args.as_slice()) {
                (_, []) => {}
                ("write", [path, content @ ..]) => {
                    params.insert("path".to_string(), Value::String(path.clone()));
                    params.insert("content".to_string(), Value::String(content.join(" ")));
                }
                ("create_venv" | "activate_venv", [venv]) => {
                    params.insert("name".to_string(), Value::String(venv.clone()));
                }
                (_, [path]) => {
                    params.insert("path".to_string(), Value::String(path.clone()));
                }
                (_, _) => return Err(format!("too many arguments for '{name}'")),
            }
        }
    }

    Ok(ReplInput::Command(CommandRequest::new(name, params)))
}

/// `(venv) ./cwd $ `
pub fn prompt(sandbox: &Sandbox, state: &SessionState) -> String {
    let venv = state
        .active_venv_bin()
        .map(|bin| format!("({}) ", venv_label(bin)))
        .unwrap_or_default();
    format!("{venv}{} $ ", sandbox.display_relative(state.cwd()))
}
