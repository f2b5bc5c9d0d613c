//! Recording service manager and installer fixtures.

#![allow(dead_code)]

use super::forge::MockForge;
use async_trait::async_trait;
use sbx_common::service_manager::ServiceManager;
use sbx_common::systemd_unit::UnitError;
use sbx_common::SbxConfig;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

/// Records every call as `"<verb> <unit>"` instead of running systemctl.
#[derive(Default)]
pub struct RecordingManager {
    calls: Mutex<Vec<String>>,
    active: Mutex<HashSet<String>>,
    fail_on: Mutex<Option<String>>,
}

impl RecordingManager {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_active(&self, unit: &str) {
        self.active.lock().unwrap().insert(unit.to_string());
    }

    /// Make the call recorded as `call` fail with a command error.
    pub fn fail_on(&self, call: &str) {
        *self.fail_on.lock().unwrap() = Some(call.to_string());
    }

    fn record(&self, call: String) -> Result<(), UnitError> {
        self.calls.lock().unwrap().push(call.clone());
        if self.fail_on.lock().unwrap().as_deref() == Some(call.as_str()) {
            return Err(UnitError::Command {
                command: format!("systemctl {}", call),
                status: "exit status: 1".into(),
                stderr: "Failed (mock)".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceManager for RecordingManager {
    async fn daemon_reload(&self) -> Result<(), UnitError> {
        self.record("daemon-reload".into())
    }

    async fn enable(&self, unit: &str) -> Result<(), UnitError> {
        self.record(format!("enable {}", unit))
    }

    async fn disable(&self, unit: &str) -> Result<(), UnitError> {
        self.record(format!("disable {}", unit))
    }

    async fn start(&self, unit: &str) -> Result<(), UnitError> {
        self.record(format!("start {}", unit))?;
        self.set_active(unit);
        Ok(())
    }

    async fn stop(&self, unit: &str) -> Result<(), UnitError> {
        self.record(format!("stop {}", unit))?;
        self.active.lock().unwrap().remove(unit);
        Ok(())
    }

    async fn restart(&self, unit: &str) -> Result<(), UnitError> {
        self.record(format!("restart {}", unit))
    }

    async fn is_active(&self, unit: &str) -> Result<bool, UnitError> {
        self.record(format!("is-active {}", unit))?;
        Ok(self.active.lock().unwrap().contains(unit))
    }
}

/// Config rooted at `root`, pointed at `forge`, tuned for fast tests.
pub fn test_config(root: &Path, forge: &MockForge) -> SbxConfig {
    let mut config = SbxConfig::default();
    config.paths.work_dir = root.join("sbx");
    config.paths.unit_dir = root.join("units");
    config.paths.sing_box_state_dir = root.join("state");
    config.forge.api_base = forge.base_url();
    config.forge.download_base = forge.base_url();
    config.download.chunk_size = 64;
    config.download.concurrent_chunks = 4;
    config.download.retry_count = 3;
    config.download.retry_delay_secs = 0;
    config.download.request_timeout_secs = 5;
    config.download.total_timeout_secs = 30;
    config.download.progress = false;
    config
}
