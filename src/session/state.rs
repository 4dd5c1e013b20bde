use std::path::{Path, PathBuf};

/// Mutable context of one session.
///
/// `cwd` is always the sandbox root or a directory below it, and
/// `active_venv_bin` (when set) points inside the sandbox. Only command
/// handlers change these, after path resolution has succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    cwd: PathBuf,
    active_venv_bin: Option<PathBuf>,
    autonomous_mode: bool,
}

impl SessionState {
    pub fn new(root: &Path) -> Self {
        Self {
            cwd: root.to_path_buf(),
            active_venv_bin: None,
            autonomous_mode: false,
        }
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn active_venv_bin(&self) -> Option<&Path> {
        self.active_venv_bin.as_deref()
    }

    pub fn autonomous_mode(&self) -> bool {
        self.autonomous_mode
    }

    pub(crate) fn set_cwd(&mut self, cwd: PathBuf) {
        self.cwd = cwd;
    }

    pub(crate) fn set_active_venv_bin(&mut self, bin: Option<PathBuf>) {
        self.active_venv_bin = bin;
    }

    /// Flips the flag and returns the new value.
    pub(crate) fn toggle_autonomous_mode(&mut self) -> bool {
        self.autonomous_mode = !self.autonomous_mode;
        self.autonomous_mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_starts_at_root() {
        let state = SessionState::new(Path::new("/sandbox"));
        assert_eq!(state.cwd(), Path::new("/sandbox"));
        assert!(state.active_venv_bin().is_none());
        assert!(!state.autonomous_mode());
    }

    #[test]
    fn test_toggle_autonomous_mode() {
        let mut state = SessionState::new(Path::new("/sandbox"));
        assert!(state.toggle_autonomous_mode());
        assert!(!state.toggle_autonomous_mode());
    }
}
