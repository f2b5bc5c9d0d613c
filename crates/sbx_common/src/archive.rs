//! tar.gz extraction into a flat destination directory.
//!
//! Entries are streamed through `GzDecoder` and `tar::Archive`; nothing is
//! buffered beyond the readers' own buffers. Only regular files are written,
//! always to `dest/<basename>`, so `../` components in entry names cannot
//! escape `dest`. Symlinks are never created or followed.

use crate::error::ErrorKind;
use crate::release_assets::ArchiveLayout;
use flate2::read::GzDecoder;
use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Permission bits kept from archive headers.
const PERMISSION_MASK: u32 = 0o777;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("failed to open archive {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt archive {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("archive {} does not contain {name}", archive.display())]
    MissingEntry { archive: PathBuf, name: String },

    #[error("extraction canceled")]
    Canceled,

    #[error("extraction worker failed: {0}")]
    Worker(String),
}

impl ArchiveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArchiveError::Open { .. } => ErrorKind::Filesystem,
            ArchiveError::Canceled => ErrorKind::Canceled,
            _ => ErrorKind::Archive,
        }
    }
}

/// Which entries get materialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractPolicy {
    /// Basenames never written
    pub skip: Vec<String>,
}

impl Default for ExtractPolicy {
    fn default() -> Self {
        Self {
            skip: vec!["README.md".to_string(), "LICENSE".to_string()],
        }
    }
}

impl ExtractPolicy {
    pub fn for_layout(layout: &ArchiveLayout) -> Self {
        Self {
            skip: layout.skip.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn skips(&self, basename: &OsStr) -> bool {
        self.skip.iter().any(|s| OsStr::new(s) == basename)
    }
}

/// What an extraction wrote and passed over.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractReport {
    pub written: Vec<PathBuf>,
    pub skipped: Vec<String>,
}

/// Extract on the blocking pool. Cancellation is checked between entries.
pub async fn extract(
    archive: &Path,
    dest: &Path,
    policy: &ExtractPolicy,
    cancel: &CancellationToken,
) -> Result<ExtractReport, ArchiveError> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    let policy = policy.clone();
    let cancel = cancel.clone();

    tokio::task::spawn_blocking(move || extract_blocking(&archive, &dest, &policy, &cancel))
        .await
        .map_err(|e| ArchiveError::Worker(e.to_string()))?
}

pub fn extract_blocking(
    archive: &Path,
    dest: &Path,
    policy: &ExtractPolicy,
    cancel: &CancellationToken,
) -> Result<ExtractReport, ArchiveError> {
    let corrupt = |source| ArchiveError::Corrupt {
        path: archive.to_path_buf(),
        source,
    };

    let file = File::open(archive).map_err(|source| ArchiveError::Open {
        path: archive.to_path_buf(),
        source,
    })?;
    fs::create_dir_all(dest).map_err(|source| ArchiveError::Write {
        path: dest.to_path_buf(),
        source,
    })?;

    let mut tar = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    let mut report = ExtractReport::default();

    for entry in tar.entries().map_err(corrupt)? {
        if cancel.is_cancelled() {
            return Err(ArchiveError::Canceled);
        }

        let mut entry = entry.map_err(corrupt)?;
        let name = entry.path().map_err(corrupt)?.into_owned();
        let display_name = name.to_string_lossy().into_owned();

        if !entry.header().entry_type().is_file() {
            debug!(entry = %display_name, kind = ?entry.header().entry_type(), "Skipping non-regular entry");
            report.skipped.push(display_name);
            continue;
        }

        let base = match name.file_name() {
            Some(base) => base.to_owned(),
            None => {
                warn!(entry = %display_name, "Entry has no file name, skipping");
                report.skipped.push(display_name);
                continue;
            }
        };

        if policy.skips(&base) {
            info!(entry = %display_name, "Skipping filtered entry");
            report.skipped.push(display_name);
            continue;
        }

        let mode = entry.header().mode().map_err(corrupt)? & PERMISSION_MASK;
        let target = dest.join(&base);
        debug!(entry = %display_name, target = %target.display(), mode = %format!("{:o}", mode), "Extracting");

        write_entry(&mut entry, &target, mode)?;
        report.written.push(target);
    }

    Ok(report)
}

/// Write one entry, truncating any existing file and refusing to follow a
/// symlink at the target.
fn write_entry(reader: &mut impl io::Read, target: &Path, mode: u32) -> Result<(), ArchiveError> {
    let write_err = |source| ArchiveError::Write {
        path: target.to_path_buf(),
        source,
    };

    let mut out = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .custom_flags(libc::O_NOFOLLOW)
        .open(target)
        .map_err(write_err)?;
    io::copy(reader, &mut out).map_err(write_err)?;
    drop(out);

    // umask applies to create(); set the exact bits afterwards.
    fs::set_permissions(target, fs::Permissions::from_mode(mode)).map_err(write_err)
}
