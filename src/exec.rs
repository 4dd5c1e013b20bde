//! Process execution for the `run` command.
//!
//! Command lines are split with POSIX word-splitting rules by `shlex` and
//! handed to the OS directly. No shell is involved, so `;`, `|`, backticks
//! and `$VAR` are plain characters in an argument.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{CoderError, Result};
use crate::sandbox::Allowlist;

/// How long to keep draining stdout/stderr once the process group is gone.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Captured result of a child process that ran to completion.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutput {
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Splits a command line into argv without interpreting it.
pub fn tokenize(command_line: &str) -> Result<Vec<String>> {
    let parts = shlex::split(command_line)
        .ok_or_else(|| CoderError::InvalidCommandLine("unbalanced quotes".to_string()))?;
    if parts.is_empty() {
        return Err(CoderError::InvalidCommandLine("empty command".to_string()));
    }
    Ok(parts)
}

/// Builds the environment a child sees.
///
/// With a venv active, its binary directory goes first on `PATH` so the OS
/// executable search finds the venv's `python`/`pip`; `VIRTUAL_ENV` points
/// at the venv and `PYTHONHOME` is dropped, which is what `bin/activate`
/// does. The caller's environment is never touched.
pub fn derive_env<I>(base: I, active_venv_bin: Option<&Path>) -> BTreeMap<OsString, OsString>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    // Windows env var names are case-insensitive (`Path` is the usual spelling)
    derive_env_with(base, active_venv_bin, cfg!(windows))
}

fn derive_env_with<I>(
    base: I,
    active_venv_bin: Option<&Path>,
    ignore_key_case: bool,
) -> BTreeMap<OsString, OsString>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut env: BTreeMap<OsString, OsString> = base.into_iter().collect();

    let Some(bin) = active_venv_bin else {
        return env;
    };

    let same_key = |key: &OsStr, name: &str| {
        if ignore_key_case {
            key.eq_ignore_ascii_case(name)
        } else {
            key == name
        }
    };

    let path_key = env
        .keys()
        .find(|key| same_key(key, "PATH"))
        .cloned()
        .unwrap_or_else(|| OsString::from("PATH"));

    let mut search: Vec<PathBuf> = vec![bin.to_path_buf()];
    if let Some(path) = env.get(&path_key) {
        search.extend(std::env::split_paths(path));
    }
    // join_paths only fails if an entry contains the separator itself
    let joined = std::env::join_paths(&search).unwrap_or_else(|_| bin.as_os_str().to_os_string());
    env.insert(path_key, joined);

    if let Some(venv_dir) = bin.parent() {
        env.retain(|key, _| !same_key(key, "VIRTUAL_ENV"));
        env.insert("VIRTUAL_ENV".into(), venv_dir.as_os_str().to_os_string());
    }
    env.retain(|key, _| !same_key(key, "PYTHONHOME"));

    env
}

/// Launches child processes for one sandbox.
///
/// `run` checks the allowlist; `spawn_internal` is for invocations the
/// session itself triggers (venv creation) and skips it.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    allowlist: Allowlist,
    timeout: Duration,
}

impl ProcessExecutor {
    pub fn new(allowlist: Allowlist, timeout: Duration) -> Self {
        Self { allowlist, timeout }
    }

    /// Runs a caller-supplied command line in `cwd`.
    pub async fn run(
        &self,
        command_line: &str,
        cwd: &Path,
        active_venv_bin: Option<&Path>,
    ) -> Result<ProcessOutput> {
        let argv = tokenize(command_line)?;
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| CoderError::InvalidCommandLine("empty command".to_string()))?;

        if !self.allowlist.permits(program) {
            warn!("Refusing to run '{program}': not in the allowlist");
            return Err(CoderError::CommandNotAllowlisted(program.clone()));
        }

        info!("Executing in {}: {argv:?}", cwd.display());
        let output = self.spawn_internal(program, args, cwd, active_venv_bin).await?;
        if output.return_code != 0 {
            warn!(
                "'{program}' exited with {}: {}",
                output.return_code,
                output.stderr.trim()
            );
        }
        Ok(output)
    }

    /// Spawns `program` with the derived environment and waits for it,
    /// bounded by the executor timeout.
    ///
    /// On Unix the child leads its own process group. Once it exits (or the
    /// timeout fires) the whole group is killed, so background processes it
    /// started cannot outlive the command or hold its output pipes open.
    pub async fn spawn_internal(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        active_venv_bin: Option<&Path>,
    ) -> Result<ProcessOutput> {
        let env = derive_env(std::env::vars_os(), active_venv_bin);

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(cwd)
            .env_clear()
            .envs(&env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let launch_failed = |source: std::io::Error| CoderError::SubprocessLaunchFailed {
            program: program.to_string(),
            source,
        };

        let mut child = command.spawn().map_err(launch_failed)?;
        let pid = child.id();
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(result) => {
                kill_process_group(pid);
                result.map_err(launch_failed)?
            }
            Err(_) => {
                kill_process_group(pid);
                // Reaps the direct child; the group is already signalled
                let _ = child.kill().await;
                warn!(
                    "'{program}' exceeded {}s, process group terminated",
                    self.timeout.as_secs()
                );
                return Err(CoderError::TimeoutExceeded(self.timeout));
            }
        };

        Ok(ProcessOutput {
            return_code: exit_code(status),
            stdout: String::from_utf8_lossy(&collect(stdout).await).into_owned(),
            stderr: String::from_utf8_lossy(&collect(stderr).await).into_owned(),
        })
    }
}

/// Reads a child pipe to EOF on a background task.
fn drain<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            // A read error just truncates the captured output
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    })
}

/// Waits for a drain task. A pipe still held open by a process that left
/// the group yields nothing rather than blocking the session.
async fn collect(task: JoinHandle<Vec<u8>>) -> Vec<u8> {
    let abort = task.abort_handle();
    match tokio::time::timeout(PIPE_DRAIN_GRACE, task).await {
        Ok(Ok(buf)) => buf,
        Ok(Err(_)) => Vec::new(),
        Err(_) => {
            warn!("Output pipe still open {}s after exit, discarding", PIPE_DRAIN_GRACE.as_secs());
            abort.abort();
            Vec::new()
        }
    }
}

/// Sends SIGKILL to the process group led by `pid` (best-effort).
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        // ESRCH: every member has already exited
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("Failed to kill process group {pid}: {e}"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

/// Numeric exit code; a child killed by a signal reports `-signal`.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> Vec<(OsString, OsString)> {
        pairs
            .iter()
            .map(|(k, v)| (OsString::from(k), OsString::from(v)))
            .collect()
    }

    fn get<'a>(env: &'a BTreeMap<OsString, OsString>, key: &str) -> Option<&'a OsString> {
        env.get(&OsString::from(key))
    }

    // ── tokenize ─────────────────────────────────────────

    #[test]
    fn test_tokenize_respects_quotes() {
        assert_eq!(
            tokenize(r#"python -c "print('hi there')""#).unwrap(),
            vec!["python", "-c", "print('hi there')"]
        );
    }

    #[test]
    fn test_tokenize_does_not_interpret_shell_syntax() {
        assert_eq!(
            tokenize("echo a; rm -rf / | cat $HOME `id`").unwrap(),
            vec!["echo", "a;", "rm", "-rf", "/", "|", "cat", "$HOME", "`id`"]
        );
    }

    #[test]
    fn test_tokenize_rejects_unbalanced_quotes() {
        let err = tokenize("echo 'oops").unwrap_err();
        assert_eq!(err.kind(), "InvalidCommandLine");
    }

    #[test]
    fn test_tokenize_rejects_empty() {
        assert_eq!(tokenize("   ").unwrap_err().kind(), "InvalidCommandLine");
    }

    // ── derive_env ───────────────────────────────────────

    #[test]
    fn test_derive_env_without_venv_is_a_copy() {
        let base = env_of(&[("PATH", "/usr/bin:/bin"), ("HOME", "/home/agent")]);
        let env = derive_env(base, None);
        assert_eq!(get(&env, "PATH").unwrap(), "/usr/bin:/bin");
        assert_eq!(get(&env, "HOME").unwrap(), "/home/agent");
        assert!(get(&env, "VIRTUAL_ENV").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_derive_env_prepends_venv_bin() {
        let base = env_of(&[("PATH", "/usr/bin:/bin"), ("PYTHONHOME", "/opt/py")]);
        let env = derive_env(base, Some(Path::new("/sandbox/.venv/bin")));
        assert_eq!(
            get(&env, "PATH").unwrap(),
            "/sandbox/.venv/bin:/usr/bin:/bin"
        );
        assert_eq!(get(&env, "VIRTUAL_ENV").unwrap(), "/sandbox/.venv");
        assert!(get(&env, "PYTHONHOME").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_derive_env_without_base_path() {
        let env = derive_env(Vec::new(), Some(Path::new("/sandbox/venv/bin")));
        assert_eq!(get(&env, "PATH").unwrap(), "/sandbox/venv/bin");
    }

    #[cfg(unix)]
    #[test]
    fn test_derive_env_matches_mixed_case_path_key() {
        let base = env_of(&[("Path", "/usr/bin"), ("PythonHome", "/opt/py")]);
        let env = derive_env_with(base, Some(Path::new("/sandbox/.venv/bin")), true);
        assert_eq!(get(&env, "Path").unwrap(), "/sandbox/.venv/bin:/usr/bin");
        assert!(get(&env, "PATH").is_none());
        assert!(get(&env, "PythonHome").is_none());
    }

    #[test]
    fn test_derive_env_leaves_process_env_untouched() {
        let before = std::env::var_os("PATH");
        let _ = derive_env(std::env::vars_os(), Some(Path::new("/tmp/venv/bin")));
        assert_eq!(std::env::var_os("PATH"), before);
    }

    // ── run ──────────────────────────────────────────────

    fn executor(allowed: &[&str], timeout_secs: u64) -> ProcessExecutor {
        ProcessExecutor::new(
            Allowlist::new(allowed.iter().copied()),
            Duration::from_secs(timeout_secs),
        )
    }

    #[tokio::test]
    async fn test_run_rejects_program_outside_allowlist() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let exec = executor(&["echo"], 5);
        let line = format!("touch {}", marker.display());
        let err = exec.run(&line, dir.path(), None).await.unwrap_err();
        assert_eq!(err.kind(), "CommandNotAllowlisted");
        assert!(!marker.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captures_output_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(&["echo"], 5);
        let output = exec.run("echo 'a;b' $HOME", dir.path(), None).await.unwrap();
        assert_eq!(output.return_code, 0);
        assert_eq!(output.stdout, "a;b $HOME\n");
        assert_eq!(output.stderr, "");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_reports_nonzero_exit_as_data() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(&["sh"], 5);
        let output = exec
            .run("sh -c 'echo boom >&2; exit 3'", dir.path(), None)
            .await
            .unwrap();
        assert_eq!(output.return_code, 3);
        assert_eq!(output.stderr, "boom\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_uses_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let cwd = dir.path().canonicalize().unwrap();
        let exec = executor(&["pwd"], 5);
        let output = exec.run("pwd", &cwd, None).await.unwrap();
        assert_eq!(output.stdout.trim(), cwd.to_str().unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(&["sleep"], 1);
        let started = std::time::Instant::now();
        let err = exec.run("sleep 10", dir.path(), None).await.unwrap_err();
        assert_eq!(err.kind(), "TimeoutExceeded");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_returns_when_program_exits_with_background_child() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let exec = executor(&["sh"], 10);
        let line = format!(
            "sh -c '(sleep 2; touch {}) & echo hi'",
            marker.display()
        );

        let started = std::time::Instant::now();
        let output = exec.run(&line, dir.path(), None).await.unwrap();
        assert_eq!(output.return_code, 0);
        assert_eq!(output.stdout, "hi\n");
        assert!(started.elapsed() < Duration::from_secs(2));

        // The background subshell went down with the process group
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!marker.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_timeout_kills_background_children() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let exec = executor(&["sh"], 1);
        let line = format!(
            "sh -c '(sleep 2; touch {}) & sleep 30'",
            marker.display()
        );

        let err = exec.run(&line, dir.path(), None).await.unwrap_err();
        assert_eq!(err.kind(), "TimeoutExceeded");

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_run_launch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(&["definitely-not-a-real-program-42"], 5);
        let err = exec
            .run("definitely-not-a-real-program-42", dir.path(), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "SubprocessLaunchFailed");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_sees_venv_env() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("venv").join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let exec = executor(&["sh"], 5);
        let output = exec
            .run("sh -c 'echo $VIRTUAL_ENV'", dir.path(), Some(&bin))
            .await
            .unwrap();
        assert_eq!(
            output.stdout.trim(),
            dir.path().join("venv").to_str().unwrap()
        );
    }
}
