use serde::Serialize;
use serde_json::Value;

use crate::error::CoderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Success,
    Error,
}

/// Snapshot reported by the `status` command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub cwd: String,
    pub active_venv: Option<String>,
    pub autonomous_mode: bool,
    pub started_at: String,
    pub uptime_secs: u64,
}

/// Command-specific fields of a result envelope.
///
/// Serialized untagged and flattened next to `status`, so each variant's
/// fields appear at the top level of the JSON object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Output {
    Message {
        message: String,
    },
    Directory {
        message: String,
        cwd: String,
    },
    Listing {
        items: Vec<String>,
    },
    Content {
        content: String,
    },
    Process {
        return_code: i32,
        stdout: String,
        stderr: String,
    },
    Venv {
        message: String,
        path: String,
    },
    Autonomous {
        message: String,
        autonomous_mode: bool,
    },
    Status(SessionStatus),
    Error {
        error: String,
        message: String,
    },
}

impl Output {
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

/// The envelope every command returns: `{"status": ..., ...fields}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResult {
    pub status: Status,
    #[serde(flatten)]
    pub output: Output,
}

impl CommandResult {
    pub fn success(output: Output) -> Self {
        Self {
            status: Status::Success,
            output,
        }
    }

    pub fn error(err: &CoderError) -> Self {
        Self {
            status: Status::Error,
            output: Output::Error {
                error: err.kind().to_string(),
                message: err.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// Taxonomy name of the failure, if this is an error envelope.
    pub fn error_kind(&self) -> Option<&str> {
        match &self.output {
            Output::Error { error, .. } => Some(error.as_str()),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({ "status": "ERROR", "error": "Io", "message": e.to_string() })
        })
    }
}

impl From<Result<Output, CoderError>> for CommandResult {
    fn from(result: Result<Output, CoderError>) -> Self {
        match result {
            Ok(output) => Self::success(output),
            Err(e) => Self::error(&e),
        }
    }
}
