//! systemd unit rendering and placement.
//!
//! A [`UnitDescriptor`] maps 1:1 onto unit directives. Empty optional fields
//! are left out of the rendered file entirely, list fields are space-joined,
//! and `[Install]` always targets `multi-user.target`.

use crate::error::{ErrorKind, FsError};
use crate::fsutil::{self, FILE_MODE};
use crate::layout::Layout;
use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum UnitError {
    #[error("unit name cannot be empty")]
    EmptyName,

    #[error("no executable at {}; install the binary first", .0.display())]
    MissingBinary(PathBuf),

    #[error("no unit descriptor for {0}")]
    UnknownUnit(String),

    #[error("failed to write unit file: {0}")]
    Write(#[from] FsError),

    #[error("{command} exited with {status}: {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("{0} canceled")]
    Canceled(String),
}

impl UnitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UnitError::EmptyName | UnitError::UnknownUnit(_) => ErrorKind::Input,
            UnitError::MissingBinary(_) => ErrorKind::Filesystem,
            UnitError::Canceled(_) => ErrorKind::Canceled,
            UnitError::Write(_) | UnitError::Command { .. } | UnitError::Spawn { .. } => {
                ErrorKind::SystemIntegration
            }
        }
    }
}

/// Fields of one rendered unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitDescriptor {
    pub description: String,
    pub documentation: String,
    pub after: Vec<String>,
    pub requires: Vec<String>,
    pub exec_start: String,
    pub exec_reload: String,
    pub timeout_stop_sec: String,
    pub restart: String,
    pub restart_sec: String,
    pub limit_nofile: String,
    pub ambient_capabilities: Vec<String>,
    pub capability_bounding_set: Vec<String>,
    pub private_tmp: bool,
    pub protect_system: String,
    /// Executable the unit supervises; must exist before the unit is written
    pub binary: PathBuf,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn directive(out: &mut String, key: &str, value: &str) {
    if !value.is_empty() {
        let _ = writeln!(out, "{}={}", key, value);
    }
}

impl UnitDescriptor {
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str("[Unit]\n");
        directive(&mut out, "Description", &self.description);
        directive(&mut out, "Documentation", &self.documentation);
        directive(&mut out, "After", &self.after.join(" "));
        directive(&mut out, "Requires", &self.requires.join(" "));

        out.push_str("\n[Service]\n");
        directive(&mut out, "ExecStart", &self.exec_start);
        directive(&mut out, "ExecReload", &self.exec_reload);
        directive(&mut out, "TimeoutStopSec", &self.timeout_stop_sec);
        directive(&mut out, "Restart", &self.restart);
        directive(&mut out, "RestartSec", &self.restart_sec);
        directive(&mut out, "LimitNOFILE", &self.limit_nofile);
        directive(&mut out, "AmbientCapabilities", &self.ambient_capabilities.join(" "));
        directive(&mut out, "CapabilityBoundingSet", &self.capability_bounding_set.join(" "));
        if self.private_tmp {
            directive(&mut out, "PrivateTmp", "true");
        }
        directive(&mut out, "ProtectSystem", &self.protect_system);

        out.push_str("\n[Install]\nWantedBy=multi-user.target\n");
        out
    }
}

pub fn caddy_descriptor(layout: &Layout) -> UnitDescriptor {
    let bin = layout.binary_path("caddy");
    let caddyfile = layout.caddyfile_path();
    UnitDescriptor {
        description: "Caddy".into(),
        documentation: "https://caddyserver.com/docs/".into(),
        after: strings(&["network.target", "network-online.target"]),
        requires: strings(&["network-online.target"]),
        exec_start: format!("{} run --environ --config {}", bin.display(), caddyfile.display()),
        exec_reload: format!("{} reload --config {} --force", bin.display(), caddyfile.display()),
        timeout_stop_sec: "5s".into(),
        limit_nofile: "1048576".into(),
        ambient_capabilities: strings(&["CAP_NET_ADMIN", "CAP_NET_BIND_SERVICE"]),
        private_tmp: true,
        protect_system: "full".into(),
        binary: bin,
        ..Default::default()
    }
}

pub fn sing_box_descriptor(layout: &Layout) -> UnitDescriptor {
    let bin = layout.binary_path("sing-box");
    let caps = strings(&[
        "CAP_NET_ADMIN",
        "CAP_NET_BIND_SERVICE",
        "CAP_SYS_PTRACE",
        "CAP_DAC_READ_SEARCH",
    ]);
    UnitDescriptor {
        description: "sing-box service".into(),
        documentation: "https://sing-box.sagernet.org".into(),
        after: strings(&["network.target", "nss-lookup.target", "network-online.target"]),
        exec_start: format!(
            "{} -D {} -C {} run",
            bin.display(),
            layout.sing_box_state_dir.display(),
            layout.sing_box_config_dir().display()
        ),
        exec_reload: "/bin/kill -HUP $MAINPID".into(),
        restart: "on-failure".into(),
        restart_sec: "10s".into(),
        limit_nofile: "infinity".into(),
        capability_bounding_set: caps.clone(),
        ambient_capabilities: caps,
        binary: bin,
        ..Default::default()
    }
}

/// Built-in descriptor for a supported binary.
pub fn descriptor_for(name: &str, layout: &Layout) -> Option<UnitDescriptor> {
    match name {
        "caddy" => Some(caddy_descriptor(layout)),
        "sing-box" => Some(sing_box_descriptor(layout)),
        _ => None,
    }
}

/// Render `descriptor` into `<unit_dir>/<name>.service` with mode 0644.
pub fn emit_unit(unit_dir: &Path, name: &str, descriptor: &UnitDescriptor) -> Result<PathBuf, UnitError> {
    if name.is_empty() {
        return Err(UnitError::EmptyName);
    }
    if !fsutil::is_file(&descriptor.binary) {
        return Err(UnitError::MissingBinary(descriptor.binary.clone()));
    }

    let path = unit_dir.join(format!("{}.service", name));
    fsutil::write_atomic(&path, descriptor.render().as_bytes(), FILE_MODE)?;
    info!(unit = name, path = %path.display(), "Service file generated");
    Ok(path)
}
