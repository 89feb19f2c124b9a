//! Per-call scratch files.
//!
//! Each execution writes its submission to a uniquely named `*.py` file in the
//! scratch directory. The file belongs to exactly one call and is removed when
//! the [`ScriptFile`] is dropped, so every exit path (success, failure,
//! timeout, panic) cleans up.
//!
//! Removal is best-effort: a failure is logged and never replaces the outcome
//! of the call.

use std::fs;
use std::io::{self, Write as _};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tempfile::{Builder, TempPath};

/// Submission materialized on disk for the lifetime of one call.
#[derive(Debug)]
pub struct ScriptFile {
    path: Option<TempPath>,
}

impl ScriptFile {
    /// Write `source` to a fresh file under `dir`, creating `dir` if needed.
    pub fn create(dir: &Path, source: &str) -> io::Result<Self> {
        fs::create_dir_all(dir)?;

        let mut file = Builder::new()
            .prefix("scriptbox-")
            .suffix(".py")
            .tempfile_in(dir)?;
        file.write_all(source.as_bytes())?;
        file.flush()?;

        // The sandboxed harness may run as a different user.
        fs::set_permissions(file.path(), fs::Permissions::from_mode(0o644))?;

        Ok(Self {
            path: Some(file.into_temp_path()),
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        // Only `Drop` takes the path out.
        self.path.as_deref().unwrap_or(Path::new(""))
    }
}

impl Drop for ScriptFile {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        let shown = path.to_path_buf();
        match path.close() {
            Ok(()) => tracing::debug!(path = %shown.display(), "removed script file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %shown.display(), error = %e, "failed to remove script file")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let script = ScriptFile::create(dir.path(), "def main():\n    return 1\n").unwrap();
        let path = script.path().to_path_buf();

        assert!(path.starts_with(dir.path()));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("py"));
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "def main():\n    return 1\n"
        );
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);

        drop(script);
        assert!(!path.exists());
    }

    #[test]
    fn names_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let a = ScriptFile::create(dir.path(), "a").unwrap();
        let b = ScriptFile::create(dir.path(), "b").unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn creates_missing_scratch_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("scratch").join("scripts");
        let script = ScriptFile::create(&nested, "x").unwrap();
        assert!(script.path().starts_with(&nested));
    }

    #[test]
    fn already_removed_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = ScriptFile::create(dir.path(), "x").unwrap();
        fs::remove_file(script.path()).unwrap();
        drop(script);
    }

    #[test]
    fn scratch_dir_under_a_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        fs::write(&file, "").unwrap();
        assert!(ScriptFile::create(&file.join("sub"), "x").is_err());
    }
}
