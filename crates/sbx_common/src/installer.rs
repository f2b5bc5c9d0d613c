//! Installer orchestration
//!
//! One binary at a time: resolve release, build URL, download into `tmp/`,
//! extract into `bin/`, chmod 0755, drop the archive. Units are emitted once
//! every requested binary is in place. The first failing step aborts the run;
//! earlier binaries and units are left as they are.

use crate::archive::{self, ArchiveError, ExtractPolicy};
use crate::config::{SbxConfig, ServiceConfig};
use crate::download::{DownloadError, Downloader};
use crate::error::{InstallStep, Result, SbxError, StepContext};
use crate::fsutil::{self, EXEC_MODE};
use crate::github_releases::GitHubClient;
use crate::layout::Layout;
use crate::release_assets::{build_url_for, ArchiveLayout, Platform};
use crate::service_manager::ServiceManager;
use crate::systemd_unit::{descriptor_for, emit_unit, UnitError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of placing one binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledBinary {
    pub name: String,
    pub version: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Removes the downloaded archive on every exit path.
struct ArchiveGuard<'a>(&'a Path);

impl Drop for ArchiveGuard<'_> {
    fn drop(&mut self) {
        if self.0.exists() {
            match std::fs::remove_file(self.0) {
                Ok(()) => debug!("Removed leftover archive {}", self.0.display()),
                Err(e) => warn!("Could not remove {}: {}", self.0.display(), e),
            }
        }
    }
}

pub struct Installer {
    layout: Layout,
    releases: GitHubClient,
    downloader: Downloader,
    platform: Platform,
    download_base: String,
    total_timeout: Duration,
    service: ServiceConfig,
    manager: Arc<dyn ServiceManager>,
    cancel: CancellationToken,
}

impl Installer {
    pub fn new(
        config: &SbxConfig,
        manager: Arc<dyn ServiceManager>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let releases = GitHubClient::with_api_base(
            &config.forge.api_base,
            config.forge_timeout(),
            &config.forge.user_agent,
        )
        .map_err(DownloadError::Client)?;
        let downloader =
            Downloader::with_user_agent(config.download.options(), &config.forge.user_agent)?;

        Ok(Self {
            layout: Layout::from_config(config),
            releases,
            downloader,
            platform: Platform::host(),
            download_base: config.forge.download_base.clone(),
            total_timeout: config.download.total_timeout(),
            service: config.service.clone(),
            manager,
            cancel,
        })
    }

    /// Override the host platform used for archive names.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_service(mut self, service: ServiceConfig) -> Self {
        self.service = service;
        self
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Place every binary, then emit and activate their units.
    pub async fn install(
        &self,
        binaries: &[&ArchiveLayout],
        want_prerelease: bool,
    ) -> Result<Vec<InstalledBinary>> {
        let installed = self.fetch_binaries(binaries, want_prerelease).await?;
        let names: Vec<&str> = binaries.iter().map(|b| b.binary).collect();
        self.install_units(&names).await?;
        Ok(installed)
    }

    /// Place binaries without touching systemd.
    pub async fn fetch_binaries(
        &self,
        binaries: &[&ArchiveLayout],
        want_prerelease: bool,
    ) -> Result<Vec<InstalledBinary>> {
        self.layout.ensure().at_step("layout", InstallStep::Layout)?;

        let mut installed = Vec::with_capacity(binaries.len());
        for binary in binaries {
            installed.push(self.fetch_binary(binary, want_prerelease).await?);
        }
        Ok(installed)
    }

    async fn fetch_binary(&self, target: &ArchiveLayout, want_prerelease: bool) -> Result<InstalledBinary> {
        let name = target.binary;
        info!(owner = target.owner, repo = target.repo, want_prerelease, "Installing {}", name);

        let version = self
            .releases
            .latest_release(target.owner, target.repo, want_prerelease, &self.cancel)
            .await
            .at_step(name, InstallStep::ResolveRelease)?;

        let url = build_url_for(target.owner, target.repo, &version, &self.platform, &self.download_base)
            .at_step(name, InstallStep::BuildUrl)?;
        info!(%url, "Downloading {} {}", name, version);

        let archive_path = self.layout.archive_path(name);
        let guard = ArchiveGuard(&archive_path);

        let report = self
            .downloader
            .download_within(&self.cancel, &url, &archive_path, self.total_timeout)
            .await
            .at_step(name, InstallStep::Download)?;

        let bin_dir = self.layout.bin_dir();
        let extracted = archive::extract(
            &archive_path,
            &bin_dir,
            &ExtractPolicy::for_layout(target),
            &self.cancel,
        )
        .await
        .at_step(name, InstallStep::Extract)?;

        let binary_path = self.layout.binary_path(name);
        if !extracted.written.contains(&binary_path) {
            return Err(SbxError::from(ArchiveError::MissingEntry {
                archive: archive_path.clone(),
                name: name.to_string(),
            })
            .at(name, InstallStep::Extract));
        }
        fsutil::set_mode(&binary_path, EXEC_MODE).at_step(name, InstallStep::Permissions)?;

        fsutil::remove(&archive_path).at_step(name, InstallStep::Remove)?;
        drop(guard);

        info!(path = %binary_path.display(), %version, "{} installed", name);
        Ok(InstalledBinary {
            name: name.to_string(),
            version,
            path: binary_path,
            size: report.size,
        })
    }

    /// Emit units for `names`, reload systemd, then enable/start per config.
    pub async fn install_units(&self, names: &[&str]) -> Result<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(names.len());
        for name in names {
            let descriptor = descriptor_for(name, &self.layout)
                .ok_or_else(|| UnitError::UnknownUnit(name.to_string()))
                .at_step(name, InstallStep::EmitUnit)?;
            let path = emit_unit(&self.layout.unit_dir, name, &descriptor)
                .at_step(name, InstallStep::EmitUnit)?;
            written.push(path);
        }

        if self.service.daemon_reload {
            self.manager
                .daemon_reload()
                .await
                .at_step("systemd", InstallStep::Reload)?;
        }

        for name in names {
            if self.service.enable {
                self.manager.enable(name).await.at_step(name, InstallStep::Enable)?;
            }
            if self.service.start {
                self.start_or_restart(name).await?;
            }
        }
        Ok(written)
    }

    /// A running service is restarted so it picks up the new binary.
    async fn start_or_restart(&self, name: &str) -> Result<()> {
        let active = self
            .manager
            .is_active(name)
            .await
            .at_step(name, InstallStep::Start)?;
        if active {
            self.manager.restart(name).await.at_step(name, InstallStep::Start)
        } else {
            self.manager.start(name).await.at_step(name, InstallStep::Start)
        }
    }

    /// Stop, disable and delete units, binaries and per-binary directories.
    ///
    /// Anything already missing is skipped.
    pub async fn uninstall(&self, names: &[&str]) -> Result<()> {
        for name in names {
            let unit_path = self.layout.unit_path(name);
            if fsutil::exists(&unit_path) {
                let active = self
                    .manager
                    .is_active(name)
                    .await
                    .at_step(name, InstallStep::Stop)?;
                if active {
                    self.manager.stop(name).await.at_step(name, InstallStep::Stop)?;
                }
                self.manager
                    .disable(name)
                    .await
                    .at_step(name, InstallStep::Disable)?;
            } else {
                debug!(unit = name, "No unit file, skipping stop/disable");
            }

            for path in [
                unit_path,
                self.layout.binary_path(name),
                self.layout.binary_dir(name),
            ] {
                if fsutil::remove(&path).at_step(name, InstallStep::Remove)? {
                    info!("Removed {}", path.display());
                }
            }
        }

        self.manager
            .daemon_reload()
            .await
            .at_step("systemd", InstallStep::Reload)?;
        Ok(())
    }
}
