//! Error types for sbx.
//!
//! Each pipeline component owns a `thiserror` enum; [`SbxError`] unifies them
//! and maps every failure onto an [`ErrorKind`] category so callers can decide
//! what is fatal without matching on strings.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub use crate::archive::ArchiveError;
pub use crate::download::DownloadError;
pub use crate::github_releases::ReleaseError;
pub use crate::release_assets::UrlError;
pub use crate::systemd_unit::UnitError;

/// Broad failure category, stable across layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    Remote,
    Archive,
    Filesystem,
    SystemIntegration,
    Canceled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Input => "input",
            ErrorKind::Remote => "remote",
            ErrorKind::Archive => "archive",
            ErrorKind::Filesystem => "filesystem",
            ErrorKind::SystemIntegration => "system-integration",
            ErrorKind::Canceled => "canceled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filesystem operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsOp {
    CreateDir,
    CreateFile,
    SetPermissions,
    Write,
    Rename,
    Remove,
    Stat,
}

impl fmt::Display for FsOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FsOp::CreateDir => "create directory",
            FsOp::CreateFile => "create file",
            FsOp::SetPermissions => "set permissions on",
            FsOp::Write => "write",
            FsOp::Rename => "rename",
            FsOp::Remove => "remove",
            FsOp::Stat => "stat",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
#[error("failed to {op} {}: {source}", path.display())]
pub struct FsError {
    pub op: FsOp,
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl FsError {
    pub fn new(op: FsOp, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self {
            op,
            path: path.into(),
            source,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Pipeline step, used to tag orchestrator failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStep {
    Layout,
    ResolveRelease,
    BuildUrl,
    Download,
    Extract,
    Permissions,
    EmitUnit,
    Reload,
    Enable,
    Start,
    Stop,
    Disable,
    Remove,
}

impl InstallStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallStep::Layout => "prepare layout",
            InstallStep::ResolveRelease => "resolve release",
            InstallStep::BuildUrl => "build download url",
            InstallStep::Download => "download",
            InstallStep::Extract => "extract",
            InstallStep::Permissions => "set permissions",
            InstallStep::EmitUnit => "emit unit",
            InstallStep::Reload => "daemon-reload",
            InstallStep::Enable => "enable service",
            InstallStep::Start => "start service",
            InstallStep::Stop => "stop service",
            InstallStep::Disable => "disable service",
            InstallStep::Remove => "remove files",
        }
    }
}

impl fmt::Display for InstallStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum SbxError {
    #[error(transparent)]
    Release(#[from] ReleaseError),

    #[error(transparent)]
    Url(#[from] UrlError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Unit(#[from] UnitError),

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Input(String),

    #[error("{step} failed for {binary}: {source}")]
    Step {
        binary: String,
        step: InstallStep,
        #[source]
        source: Box<SbxError>,
    },
}

impl SbxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SbxError::Release(e) => e.kind(),
            SbxError::Url(_) => ErrorKind::Input,
            SbxError::Download(e) => e.kind(),
            SbxError::Archive(e) => e.kind(),
            SbxError::Unit(e) => e.kind(),
            SbxError::Fs(_) => ErrorKind::Filesystem,
            SbxError::Config(_) => ErrorKind::Input,
            SbxError::Input(_) => ErrorKind::Input,
            SbxError::Step { source, .. } => source.kind(),
        }
    }

    /// Tag an error with the binary and step it came from.
    pub fn at(self, binary: impl Into<String>, step: InstallStep) -> Self {
        SbxError::Step {
            binary: binary.into(),
            step,
            source: Box::new(self),
        }
    }

    /// The step that failed, if this error was tagged by the installer.
    pub fn step(&self) -> Option<InstallStep> {
        match self {
            SbxError::Step { step, .. } => Some(*step),
            _ => None,
        }
    }
}

pub type Result<T, E = SbxError> = std::result::Result<T, E>;

/// Attach the binary and step to any component error.
pub trait StepContext<T> {
    fn at_step(self, binary: &str, step: InstallStep) -> Result<T>;
}

impl<T, E: Into<SbxError>> StepContext<T> for std::result::Result<T, E> {
    fn at_step(self, binary: &str, step: InstallStep) -> Result<T> {
        self.map_err(|e| e.into().at(binary, step))
    }
}
