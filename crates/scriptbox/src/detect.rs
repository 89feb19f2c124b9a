//! Binary detection utilities.

use std::path::{Path, PathBuf};

/// Resolve a binary name to an absolute path.
///
/// Absolute and relative paths (anything containing a `/`) are checked
/// directly. Bare names are looked up on `PATH`.
pub fn resolve_binary(name: &Path) -> Option<PathBuf> {
    if name.components().count() > 1 || name.is_absolute() {
        if name.is_file() && is_executable(name) {
            return Some(name.to_path_buf());
        }
        return None;
    }

    which::which(name).ok()
}

/// Path of `name` next to the running executable, if it exists.
///
/// The CLI and the harness are installed side by side, so this is the
/// default harness location.
pub fn sibling_binary(name: &str) -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let path = exe.parent()?.join(name);
    (path.is_file() && is_executable(&path)).then_some(path)
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
