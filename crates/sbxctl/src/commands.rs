//! Command handlers for sbxctl

use crate::output;
use anyhow::{Context, Result};
use sbx_common::{caddyfile, ArchiveLayout, Installer, Layout, SbxConfig, Systemctl, CADDY, SING_BOX};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

const ALL: &[&ArchiveLayout] = &[&CADDY, &SING_BOX];

fn unit_names(binaries: &[&ArchiveLayout]) -> Vec<&'static str> {
    binaries.iter().map(|b| b.binary).collect()
}

fn installer(config: &SbxConfig, cancel: &CancellationToken) -> Result<Installer> {
    let manager = Arc::new(Systemctl::new(cancel.clone()));
    Installer::new(config, manager, cancel.clone()).context("Failed to set up installer")
}

/// Download and place one binary, no systemd changes.
pub async fn fetch(
    config: &SbxConfig,
    cancel: &CancellationToken,
    target: &'static ArchiveLayout,
    latest: bool,
) -> Result<()> {
    let installed = installer(config, cancel)?
        .fetch_binaries(&[target], latest)
        .await
        .with_context(|| format!("Failed to install {}", target.binary))?;
    output::display_installed(&installed);
    Ok(())
}

/// Install both binaries and their services.
pub async fn install(config: &SbxConfig, cancel: &CancellationToken, latest: bool, start: bool) -> Result<()> {
    let mut service = config.service.clone();
    if start {
        service.enable = true;
        service.start = true;
    }

    let installed = installer(config, cancel)?
        .with_service(service)
        .install(ALL, latest)
        .await
        .context("Installation failed")?;
    output::display_installed(&installed);
    output::display_success("Services installed");
    Ok(())
}

/// Emit units for already-installed binaries and reload systemd.
pub async fn service(config: &SbxConfig, cancel: &CancellationToken) -> Result<()> {
    let written = installer(config, cancel)?
        .install_units(&unit_names(ALL))
        .await
        .context("Failed to generate services")?;
    for path in written {
        output::display_success(&format!("Wrote {}", path.display()));
    }
    Ok(())
}

pub fn caddyfile(config: &SbxConfig, domain: &str) -> Result<()> {
    let layout = Layout::from_config(config);
    let path = layout.caddyfile_path();
    caddyfile::write(domain, &layout.caddy_log(), &path)
        .with_context(|| format!("Failed to generate Caddyfile for {}", domain))?;
    info!(domain, "Caddyfile generated");
    output::display_success(&format!("Wrote {}", path.display()));
    Ok(())
}

pub async fn uninstall(config: &SbxConfig, cancel: &CancellationToken) -> Result<()> {
    installer(config, cancel)?
        .uninstall(&unit_names(ALL))
        .await
        .context("Uninstall failed")?;
    output::display_success("Caddy and sing-box removed");
    Ok(())
}
