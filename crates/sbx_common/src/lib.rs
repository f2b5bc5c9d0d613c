//! sbx Common - release-driven installer for Caddy and sing-box
//!
//! Resolves the newest upstream release, downloads the platform archive in
//! parallel ranged chunks, extracts the binary and puts it under systemd.

pub mod archive;
pub mod caddyfile;
pub mod config;
pub mod download;
pub mod error;
pub mod fsutil;
pub mod github_releases;
pub mod installer;
pub mod layout;
pub mod release_assets;
pub mod service_manager;
pub mod systemd_unit;

pub use config::SbxConfig;
pub use error::{ErrorKind, InstallStep, Result, SbxError};
pub use installer::{InstalledBinary, Installer};
pub use layout::Layout;
pub use release_assets::{ArchiveLayout, Platform, CADDY, SING_BOX};
pub use service_manager::{ServiceManager, Systemctl};
