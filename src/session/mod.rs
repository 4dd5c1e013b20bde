pub mod command;
pub mod fs;
pub mod result;
pub mod state;

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{CoderError, Result};
use crate::exec::ProcessExecutor;
use crate::sandbox::Sandbox;
use crate::venv::VenvManager;

pub use command::{Command, CommandKind};
pub use result::{CommandResult, Output, SessionStatus, Status};
pub use state::SessionState;

/// One structured command from the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    pub name: String,
    pub params: Map<String, Value>,
}

impl CommandRequest {
    pub fn new(name: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

/// A sandboxed terminal session.
///
/// [`Session::execute`] is the only way in. Commands run one at a time: the
/// state lock is held for the whole command, including a `run` child, so a
/// `cd` can never interleave with a command that reads the cwd.
pub struct Session {
    id: Uuid,
    started_at: DateTime<Utc>,
    start_time: Instant,
    sandbox: Arc<Sandbox>,
    executor: ProcessExecutor,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        let id = Uuid::new_v4();
        let executor = ProcessExecutor::new(sandbox.allowlist().clone(), sandbox.command_timeout());
        let state = SessionState::new(sandbox.root());
        info!("Session {id} initialized, jail at {}", sandbox.root().display());

        Self {
            id,
            started_at: Utc::now(),
            start_time: Instant::now(),
            sandbox,
            executor,
            state: Mutex::new(state),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// Copy of the current state, e.g. for rendering a prompt.
    pub async fn snapshot(&self) -> SessionState {
        self.state.lock().await.clone()
    }

    /// Runs `command` with `params` (a JSON object, or null for none).
    ///
    /// Never fails: errors come back as an `ERROR` envelope.
    pub async fn execute(&self, command: &str, params: Value) -> CommandResult {
        let params = match params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return CommandResult::error(&CoderError::InvalidParams {
                    command: command.to_string(),
                    reason: format!("parameters must be an object, got {other}"),
                })
            }
        };
        self.execute_request(CommandRequest::new(command, params)).await
    }

    pub async fn execute_request(&self, request: CommandRequest) -> CommandResult {
        let parsed = request
            .name
            .parse::<CommandKind>()
            .and_then(|kind| Command::parse(kind, request.params));

        let result = match parsed {
            Ok(command) => self.dispatch(command).await,
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            debug!("Session {}: '{}' failed: {e}", self.id, request.name);
        }
        CommandResult::from(result)
    }

    async fn dispatch(&self, command: Command) -> Result<Output> {
        let mut state = self.state.lock().await;
        debug!("Session {}: {} in {}", self.id, command.kind(), state.cwd().display());

        let sandbox = self.sandbox.as_ref();
        let venvs = VenvManager::new(sandbox, &self.executor);

        match command {
            Command::Ls { path } => fs::ls(sandbox, &state, &path).await,
            Command::Cd { path } => fs::cd(sandbox, &mut state, &path).await,
            Command::Read { path } => fs::read(sandbox, &state, &path).await,
            Command::Write { path, content } => fs::write(sandbox, &state, &path, &content).await,
            Command::Mkdir { path } => fs::mkdir(sandbox, &state, &path).await,
            Command::Rm { path } => fs::rm(sandbox, &state, &path).await,
            Command::CreateVenv { name } => venvs.create(&state, &name).await,
            Command::ActivateVenv { name } => venvs.activate(&mut state, &name).await,
            Command::DeactivateVenv => Ok(venvs.deactivate(&mut state)),
            Command::Run { command_line } => {
                let output = self
                    .executor
                    .run(&command_line, state.cwd(), state.active_venv_bin())
                    .await?;
                Ok(Output::Process {
                    return_code: output.return_code,
                    stdout: output.stdout,
                    stderr: output.stderr,
                })
            }
            Command::ToggleAutonomousMode => {
                let enabled = state.toggle_autonomous_mode();
                info!(
                    "Session {}: autonomous mode {}",
                    self.id,
                    if enabled { "enabled" } else { "disabled" }
                );
                Ok(Output::Autonomous {
                    message: format!(
                        "Autonomous mode is now {}.",
                        if enabled { "ENABLED" } else { "DISABLED" }
                    ),
                    autonomous_mode: enabled,
                })
            }
            Command::Help => Ok(Output::Content {
                content: CommandKind::help_text(),
            }),
            Command::Status => Ok(Output::Status(self.status(&state))),
        }
    }

    fn status(&self, state: &SessionState) -> SessionStatus {
        SessionStatus {
            session_id: self.id.to_string(),
            cwd: self.sandbox.display_relative(state.cwd()),
            active_venv: state
                .active_venv_bin()
                .and_then(|bin| bin.parent())
                .map(|venv| self.sandbox.display_relative(venv)),
            autonomous_mode: state.autonomous_mode(),
            started_at: self.started_at.to_rfc3339(),
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }
}
