//! Skip-if-exists checkpointing and atomic output placement.
//!
//! Every stage's completion is evidenced solely by the presence of its
//! designated output file; tables written by this crate go through
//! [`write_atomic`] so a crash mid-write cannot leave a plausible checkpoint.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// True when the designated terminal output of a stage already exists, in
/// which case the stage must be skipped and the prior result reused.
pub fn reuse(path: &Path) -> bool {
    path.is_file()
}

/// Write `bytes` to a temporary sibling and rename it into place, creating
/// parent directories as needed.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let staging = staging_path(path);
    fs::write(&staging, bytes)?;
    fs::rename(&staging, path)
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn atomic_write_creates_parents_and_leaves_no_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/out.txt");
        assert!(!reuse(&path));

        write_atomic(&path, b"contents").unwrap();
        assert!(reuse(&path));
        assert_eq!(fs::read(&path).unwrap(), b"contents");
        assert!(!staging_path(&path).exists());
    }

    #[test]
    fn atomic_write_replaces_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
    }
}
