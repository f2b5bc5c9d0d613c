//! Release asset naming - maps a repository, version and host platform to the
//! archive that repository publishes, and to its download URL.

use thiserror::Error;

pub const DEFAULT_DOWNLOAD_BASE: &str = "https://github.com";

/// Entries every supported archive ships next to the binary.
const DOC_ENTRIES: &[&str] = &["README.md", "LICENSE"];

/// Per-repository archive layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveLayout {
    /// Repository name, also the key of the table
    pub repo: &'static str,
    /// Owner the installer fetches from
    pub owner: &'static str,
    /// Filename template; `{version}`, `{os}` and `{arch}` are substituted
    pub template: &'static str,
    /// Binary name produced by extraction
    pub binary: &'static str,
    /// Archive entry basenames that are never materialized
    pub skip: &'static [&'static str],
}

pub const CADDY: ArchiveLayout = ArchiveLayout {
    repo: "caddy",
    owner: "caddyserver",
    template: "caddy_{version}_{os}_{arch}.tar.gz",
    binary: "caddy",
    skip: DOC_ENTRIES,
};

pub const SING_BOX: ArchiveLayout = ArchiveLayout {
    repo: "sing-box",
    owner: "SagerNet",
    template: "sing-box-{version}-{os}-{arch}.tar.gz",
    binary: "sing-box",
    skip: DOC_ENTRIES,
};

/// Supported repositories, keyed by name.
pub const SUPPORTED: &[ArchiveLayout] = &[CADDY, SING_BOX];

pub fn layout_for(repo: &str) -> Option<&'static ArchiveLayout> {
    SUPPORTED.iter().find(|l| l.repo == repo)
}

impl ArchiveLayout {
    pub fn file_name(&self, version: &str, platform: &Platform) -> String {
        self.template
            .replace("{version}", version)
            .replace("{os}", &platform.os)
            .replace("{arch}", &platform.arch)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum UrlError {
    #[error("repoOwner, repoName, and version must be non-empty")]
    EmptyInput,

    #[error("unsupported repoName: {0}")]
    UnsupportedRepo(String),
}

/// OS and architecture identifiers in the forge's naming scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// The platform this process runs on.
    pub fn host() -> Self {
        Self::new(
            os_identifier(std::env::consts::OS),
            arch_identifier(std::env::consts::ARCH),
        )
    }
}

fn os_identifier(os: &str) -> &str {
    match os {
        "macos" => "darwin",
        other => other,
    }
}

fn arch_identifier(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "arm" => "armv7",
        "loongarch64" => "loong64",
        other => other,
    }
}

/// Download URL for `name` at `version` on the host platform.
pub fn build_url(owner: &str, name: &str, version: &str) -> Result<String, UrlError> {
    build_url_for(owner, name, version, &Platform::host(), DEFAULT_DOWNLOAD_BASE)
}

/// Download URL for an explicit platform and forge base.
///
/// The path carries `v{version}` while the filename carries the bare version.
pub fn build_url_for(
    owner: &str,
    name: &str,
    version: &str,
    platform: &Platform,
    base: &str,
) -> Result<String, UrlError> {
    if owner.is_empty() || name.is_empty() || version.is_empty() {
        return Err(UrlError::EmptyInput);
    }

    let layout = layout_for(name).ok_or_else(|| UrlError::UnsupportedRepo(name.to_string()))?;
    let file_name = layout.file_name(version, platform);

    Ok(format!(
        "{}/{}/{}/releases/download/v{}/{}",
        base.trim_end_matches('/'),
        owner,
        name,
        version,
        file_name
    ))
}
