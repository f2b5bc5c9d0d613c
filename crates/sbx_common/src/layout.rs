//! On-disk layout of an installation.
//!
//! ```text
//! <work>/bin/<binary>              0755
//! <work>/tmp/<binary>.tar.gz       transient
//! <work>/log/{caddy,access,sing-box}.log
//! <work>/backup/
//! <work>/caddy/Caddyfile
//! <work>/sing-box/config/
//! <unit_dir>/<name>.service        0644
//! ```

use crate::config::SbxConfig;
use crate::error::FsError;
use crate::fsutil::{self, DIR_MODE, FILE_MODE};
use std::path::PathBuf;
use tracing::info;

pub const CADDY_DIR: &str = "caddy";
pub const SING_BOX_DIR: &str = "sing-box";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub work_dir: PathBuf,
    pub unit_dir: PathBuf,
    pub sing_box_state_dir: PathBuf,
}

impl Layout {
    pub fn new(
        work_dir: impl Into<PathBuf>,
        unit_dir: impl Into<PathBuf>,
        sing_box_state_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            work_dir: work_dir.into(),
            unit_dir: unit_dir.into(),
            sing_box_state_dir: sing_box_state_dir.into(),
        }
    }

    pub fn from_config(config: &SbxConfig) -> Self {
        Self::new(
            &config.paths.work_dir,
            &config.paths.unit_dir,
            &config.paths.sing_box_state_dir,
        )
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.work_dir.join("bin")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.work_dir.join("tmp")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.work_dir.join("log")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.work_dir.join("backup")
    }

    /// Per-binary working directory.
    pub fn binary_dir(&self, name: &str) -> PathBuf {
        self.work_dir.join(name)
    }

    pub fn binary_path(&self, name: &str) -> PathBuf {
        self.bin_dir().join(name)
    }

    pub fn archive_path(&self, name: &str) -> PathBuf {
        self.tmp_dir().join(format!("{}.tar.gz", name))
    }

    pub fn unit_path(&self, name: &str) -> PathBuf {
        self.unit_dir.join(format!("{}.service", name))
    }

    pub fn caddyfile_path(&self) -> PathBuf {
        self.binary_dir(CADDY_DIR).join("Caddyfile")
    }

    pub fn sing_box_config_dir(&self) -> PathBuf {
        self.binary_dir(SING_BOX_DIR).join("config")
    }

    pub fn caddy_log(&self) -> PathBuf {
        self.log_dir().join("caddy.log")
    }

    pub fn access_log(&self) -> PathBuf {
        self.log_dir().join("access.log")
    }

    pub fn sing_box_log(&self) -> PathBuf {
        self.log_dir().join("sing-box.log")
    }

    /// Every directory `ensure` creates, parents first.
    pub fn directories(&self) -> Vec<PathBuf> {
        vec![
            self.work_dir.clone(),
            self.bin_dir(),
            self.tmp_dir(),
            self.log_dir(),
            self.backup_dir(),
            self.binary_dir(CADDY_DIR),
            self.binary_dir(SING_BOX_DIR),
            self.sing_box_config_dir(),
        ]
    }

    pub fn log_files(&self) -> Vec<PathBuf> {
        vec![self.caddy_log(), self.access_log(), self.sing_box_log()]
    }

    /// Create the tree. Safe to run repeatedly; existing log contents are kept.
    pub fn ensure(&self) -> Result<(), FsError> {
        for dir in self.directories() {
            fsutil::create_dir(&dir, DIR_MODE)?;
        }
        for file in self.log_files() {
            fsutil::touch(&file, FILE_MODE)?;
        }
        info!(work_dir = %self.work_dir.display(), "Directory layout ready");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsutil::mode_of;
    use tempfile::TempDir;

    #[test]
    fn test_paths() {
        let layout = Layout::new("/etc/app", "/etc/systemd/system", "/var/lib/sing-box");
        assert_eq!(layout.binary_path("caddy"), PathBuf::from("/etc/app/bin/caddy"));
        assert_eq!(
            layout.archive_path("sing-box"),
            PathBuf::from("/etc/app/tmp/sing-box.tar.gz")
        );
        assert_eq!(
            layout.caddyfile_path(),
            PathBuf::from("/etc/app/caddy/Caddyfile")
        );
        assert_eq!(
            layout.unit_path("caddy"),
            PathBuf::from("/etc/systemd/system/caddy.service")
        );
    }

    #[test]
    fn test_ensure_is_idempotent_with_modes() {
        let temp = TempDir::new().unwrap();
        let layout = Layout::new(temp.path().join("sbx"), temp.path().join("units"), "/var/lib/sing-box");

        layout.ensure().unwrap();
        std::fs::write(layout.caddy_log(), "kept\n").unwrap();
        layout.ensure().unwrap();

        for dir in layout.directories() {
            assert!(dir.is_dir(), "{} missing", dir.display());
            assert_eq!(mode_of(&dir).unwrap(), 0o755, "{}", dir.display());
        }
        for file in layout.log_files() {
            assert_eq!(mode_of(&file).unwrap(), 0o644, "{}", file.display());
        }
        assert_eq!(std::fs::read_to_string(layout.caddy_log()).unwrap(), "kept\n");
    }
}
