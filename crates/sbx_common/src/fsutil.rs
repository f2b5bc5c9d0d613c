//! Filesystem helpers with explicit permissions.
//!
//! Modes are applied with an explicit `chmod` after creation so the process
//! umask can never weaken them.

use crate::error::{FsError, FsOp};
use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tracing::debug;

pub const DIR_MODE: u32 = 0o755;
pub const EXEC_MODE: u32 = 0o755;
pub const FILE_MODE: u32 = 0o644;

pub fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

pub fn is_dir(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
}

pub fn is_file(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

/// Permission bits of `path` (`0o7777` mask).
pub fn mode_of(path: &Path) -> Result<u32, FsError> {
    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o7777)
        .map_err(|e| FsError::new(FsOp::Stat, path, e))
}

pub fn set_mode(path: &Path, mode: u32) -> Result<(), FsError> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| FsError::new(FsOp::SetPermissions, path, e))
}

/// Create `dir` (and missing parents) and force its mode. Idempotent.
pub fn create_dir(dir: &Path, mode: u32) -> Result<(), FsError> {
    if is_dir(dir) {
        debug!("Directory already exists: {}", dir.display());
    } else {
        fs::create_dir_all(dir).map_err(|e| FsError::new(FsOp::CreateDir, dir, e))?;
        debug!("Directory created: {}", dir.display());
    }
    set_mode(dir, mode)
}

/// Create an empty file if nothing exists at `path`. Existing files are untouched.
pub fn touch(path: &Path, mode: u32) -> Result<(), FsError> {
    if exists(path) {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| FsError::new(FsOp::CreateDir, parent, e))?;
    }
    fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)
        .map_err(|e| FsError::new(FsOp::CreateFile, path, e))?;
    set_mode(path, mode)
}

pub fn rename(from: &Path, to: &Path) -> Result<(), FsError> {
    fs::rename(from, to).map_err(|e| FsError::new(FsOp::Rename, from, e))
}

/// Write `contents` to a sibling temp file, chmod it, then rename over `path`.
pub fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> Result<(), FsError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| FsError::new(FsOp::CreateDir, parent, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = parent.join(format!(".{}.tmp-{}", file_name, std::process::id()));

    let result = (|| {
        let mut file =
            fs::File::create(&staging).map_err(|e| FsError::new(FsOp::CreateFile, &staging, e))?;
        file.write_all(contents)
            .and_then(|_| file.sync_all())
            .map_err(|e| FsError::new(FsOp::Write, &staging, e))?;
        set_mode(&staging, mode)?;
        rename(&staging, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&staging);
    }
    result
}

/// Remove a file or directory tree. Returns `false` when nothing was there.
pub fn remove(path: &Path) -> Result<bool, FsError> {
    let meta = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(FsError::new(FsOp::Stat, path, e)),
    };

    let result = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => {
            debug!("Removed {}", path.display());
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(FsError::new(FsOp::Remove, path, e)),
    }
}
