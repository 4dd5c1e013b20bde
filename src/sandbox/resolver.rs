//! Jail enforcement for caller-supplied paths.
//!
//! Every handler that takes a path goes through [`resolve`] first and only
//! ever touches the path it returns.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use tracing::warn;

use crate::error::{CoderError, Result};

/// Resolves `raw` against `cwd` and checks that it stays inside `root`.
///
/// `root` and `cwd` must already be canonical. The returned path is canonical
/// up to the first component that does not exist yet; the remainder is
/// normalized lexically so `write`/`mkdir` targets can be resolved before
/// they are created.
pub fn resolve(raw: &str, cwd: &Path, root: &Path) -> Result<PathBuf> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CoderError::EmptyPath);
    }

    let candidate = if Path::new(trimmed).is_absolute() {
        PathBuf::from(trimmed)
    } else {
        cwd.join(trimmed)
    };

    let resolved = canonicalize_lenient(&candidate, raw)?;

    // Component-wise prefix test: /sandboxed_evil does not start with /sandbox
    if !resolved.starts_with(root) {
        warn!(
            "Path traversal DENIED: '{raw}' resolves to {} outside {}",
            resolved.display(),
            root.display()
        );
        return Err(CoderError::PathTraversalDenied(raw.to_string()));
    }

    Ok(resolved)
}

/// Canonicalizes `path` one component at a time.
///
/// Existing components are run through `fs::canonicalize` so symlinks are
/// replaced by their real target. `..` pops the already-canonical prefix.
/// Missing components are kept as-is; they cannot be symlinks.
fn canonicalize_lenient(path: &Path, raw: &str) -> Result<PathBuf> {
    let mut resolved = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => resolved.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(name) => {
                resolved.push(name);
                match std::fs::symlink_metadata(&resolved) {
                    Ok(meta) => match std::fs::canonicalize(&resolved) {
                        Ok(real) => resolved = real,
                        Err(_) if meta.file_type().is_symlink() => {
                            // Writing through a dangling link would create its
                            // target wherever it points.
                            warn!("Path traversal DENIED: '{raw}' goes through a dangling symlink");
                            return Err(CoderError::PathTraversalDenied(raw.to_string()));
                        }
                        Err(e) => return Err(CoderError::io(&resolved, e)),
                    },
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(CoderError::io(&resolved, e)),
                }
            }
        }
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sandbox")).unwrap();
        let root = dir.path().join("sandbox").canonicalize().unwrap();
        (dir, root)
    }

    #[test]
    fn test_resolve_relative_to_cwd() {
        let (_dir, root) = sandbox();
        std::fs::create_dir(root.join("sub")).unwrap();
        let cwd = root.join("sub");
        assert_eq!(resolve("a.txt", &cwd, &root).unwrap(), cwd.join("a.txt"));
    }

    #[test]
    fn test_resolve_dot_is_cwd() {
        let (_dir, root) = sandbox();
        assert_eq!(resolve(".", &root, &root).unwrap(), root);
    }

    #[test]
    fn test_resolve_parent_inside_sandbox() {
        let (_dir, root) = sandbox();
        std::fs::create_dir(root.join("proj")).unwrap();
        let cwd = root.join("proj");
        assert_eq!(resolve("..", &cwd, &root).unwrap(), root);
        assert_eq!(
            resolve("../proj/./a.txt", &cwd, &root).unwrap(),
            cwd.join("a.txt")
        );
    }

    #[test]
    fn test_resolve_denies_parent_escape() {
        let (_dir, root) = sandbox();
        let err = resolve("..", &root, &root).unwrap_err();
        assert_eq!(err.kind(), "PathTraversalDenied");
        assert!(resolve("../../../etc/passwd", &root, &root).is_err());
    }

    #[test]
    fn test_resolve_denies_escape_through_missing_dirs() {
        let (_dir, root) = sandbox();
        // nope/ does not exist; the `..` segments must still be honored
        let err = resolve("nope/../../outside.txt", &root, &root).unwrap_err();
        assert_eq!(err.kind(), "PathTraversalDenied");
    }

    #[test]
    fn test_resolve_missing_path_inside_sandbox() {
        let (_dir, root) = sandbox();
        assert_eq!(
            resolve("new/dir/../file.txt", &root, &root).unwrap(),
            root.join("new").join("file.txt")
        );
    }

    #[test]
    fn test_resolve_absolute_paths() {
        let (_dir, root) = sandbox();
        assert!(resolve("/", &root, &root).is_err());
        let inside = root.join("x.txt");
        assert_eq!(
            resolve(inside.to_str().unwrap(), &root, &root).unwrap(),
            inside
        );
    }

    #[test]
    fn test_resolve_sibling_with_common_prefix_denied() {
        let (dir, root) = sandbox();
        let evil = dir.path().join("sandboxed_evil");
        std::fs::create_dir(&evil).unwrap();
        let err = resolve("../sandboxed_evil/x", &root, &root).unwrap_err();
        assert_eq!(err.kind(), "PathTraversalDenied");
    }

    #[test]
    fn test_resolve_empty_path_rejected() {
        let (_dir, root) = sandbox();
        let err = resolve("  ", &root, &root).unwrap_err();
        assert_eq!(err.kind(), "InvalidParams");
        assert_eq!(err.to_string(), "Invalid parameters: path must be a non-empty string");
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_denies_symlink_out_of_sandbox() {
        let (dir, root) = sandbox();
        let outside = dir.path().join("outside");
        std::fs::create_dir(&outside).unwrap();
        std::fs::write(outside.join("secret.txt"), "s3cr3t").unwrap();
        std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();

        assert!(resolve("link", &root, &root).is_err());
        assert!(resolve("link/secret.txt", &root, &root).is_err());
        assert!(resolve("link/new.txt", &root, &root).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_denies_symlink_after_missing_component() {
        let (dir, root) = sandbox();
        std::os::unix::fs::symlink(dir.path(), root.join("up")).unwrap();
        let err = resolve("ghost/../up/x.txt", &root, &root).unwrap_err();
        assert_eq!(err.kind(), "PathTraversalDenied");
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_follows_symlink_inside_sandbox() {
        let (_dir, root) = sandbox();
        std::fs::create_dir(root.join("real")).unwrap();
        std::os::unix::fs::symlink(root.join("real"), root.join("alias")).unwrap();
        assert_eq!(
            resolve("alias/f.txt", &root, &root).unwrap(),
            root.join("real").join("f.txt")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_denies_dangling_symlink() {
        let (dir, root) = sandbox();
        std::os::unix::fs::symlink(dir.path().join("not-yet"), root.join("dangling")).unwrap();
        let err = resolve("dangling", &root, &root).unwrap_err();
        assert_eq!(err.kind(), "PathTraversalDenied");
    }
}
