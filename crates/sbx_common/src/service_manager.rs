//! Service manager seam.
//!
//! The installer talks to systemd only through [`ServiceManager`], so tests
//! can substitute a recording double. [`Systemctl`] is the real thing.

use crate::systemd_unit::UnitError;
use async_trait::async_trait;
use std::process::Output;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[async_trait]
pub trait ServiceManager: Send + Sync {
    async fn daemon_reload(&self) -> Result<(), UnitError>;
    async fn enable(&self, unit: &str) -> Result<(), UnitError>;
    async fn disable(&self, unit: &str) -> Result<(), UnitError>;
    async fn start(&self, unit: &str) -> Result<(), UnitError>;
    async fn stop(&self, unit: &str) -> Result<(), UnitError>;
    async fn restart(&self, unit: &str) -> Result<(), UnitError>;
    async fn is_active(&self, unit: &str) -> Result<bool, UnitError>;
}

/// `systemctl` via child processes. Children are killed if the token fires.
#[derive(Debug, Clone)]
pub struct Systemctl {
    program: String,
    cancel: CancellationToken,
}

impl Systemctl {
    pub fn new(cancel: CancellationToken) -> Self {
        Self::with_program("systemctl", cancel)
    }

    pub fn with_program(program: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            program: program.into(),
            cancel,
        }
    }

    fn describe(&self, args: &[&str]) -> String {
        format!("{} {}", self.program, args.join(" "))
    }

    async fn output(&self, args: &[&str]) -> Result<Output, UnitError> {
        let command = self.describe(args);
        debug!("Executing: {}", command);

        let child = Command::new(&self.program)
            .args(args)
            .kill_on_drop(true)
            .output();

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(UnitError::Canceled(command)),
            out = child => out.map_err(|source| UnitError::Spawn { command, source }),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<(), UnitError> {
        let output = self.output(args).await?;
        if output.status.success() {
            return Ok(());
        }
        Err(UnitError::Command {
            command: self.describe(args),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[async_trait]
impl ServiceManager for Systemctl {
    async fn daemon_reload(&self) -> Result<(), UnitError> {
        self.run(&["daemon-reload"]).await?;
        info!("systemd daemon reloaded");
        Ok(())
    }

    async fn enable(&self, unit: &str) -> Result<(), UnitError> {
        self.run(&["enable", unit]).await?;
        info!(unit, "Service enabled");
        Ok(())
    }

    async fn disable(&self, unit: &str) -> Result<(), UnitError> {
        self.run(&["disable", unit]).await?;
        info!(unit, "Service disabled");
        Ok(())
    }

    async fn start(&self, unit: &str) -> Result<(), UnitError> {
        self.run(&["start", unit]).await?;
        info!(unit, "Service started");
        Ok(())
    }

    async fn stop(&self, unit: &str) -> Result<(), UnitError> {
        self.run(&["stop", unit]).await?;
        info!(unit, "Service stopped");
        Ok(())
    }

    async fn restart(&self, unit: &str) -> Result<(), UnitError> {
        self.run(&["restart", unit]).await?;
        info!(unit, "Service restarted");
        Ok(())
    }

    /// A non-zero `is-active` exit means inactive, not failure.
    async fn is_active(&self, unit: &str) -> Result<bool, UnitError> {
        let output = self.output(&["is-active", "--quiet", unit]).await?;
        Ok(output.status.success())
    }
}
