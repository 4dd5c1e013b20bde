//! Fluux Coder — a sandboxed, stateful terminal session for AI agents.
//!
//! An agent drives a [`Session`] with structured commands (`ls`, `write`,
//! `run`, `create_venv`, ...). Every path is resolved inside a fixed jail
//! directory, `run` only launches allowlisted programs without a shell, and
//! virtual environments are activated by rewriting the child's `PATH`.
//!
//! ```no_run
//! use std::sync::Arc;
//! use fluux_coder::{Config, Sandbox, Session};
//! use serde_json::json;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = Config::load("config/coder.toml")?;
//! let session = Session::new(Arc::new(Sandbox::new(&config.sandbox)?));
//! let result = session.execute("write", json!({"path": "a.txt", "content": "hi"})).await;
//! assert!(result.is_success());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod exec;
pub mod repl;
pub mod sandbox;
pub mod session;
pub mod venv;

pub use config::{Config, SandboxConfig};
pub use error::{CoderError, Result};
pub use sandbox::{Allowlist, Sandbox};
pub use session::{CommandKind, CommandRequest, CommandResult, Session, SessionState, Status};
