//! Process relaunch.
//!
//! [`ProcessRestartTrigger`] spawns a fresh copy of the running executable
//! with the same arguments and then exits the current process, so the newly
//! installed bundle is picked up on the next start.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;

#[async_trait]
pub trait RestartTrigger: Send + Sync {
    /// Relaunch the application. On success this normally does not return.
    async fn restart(&self) -> Result<()>;
}

pub struct ProcessRestartTrigger {
    executable: PathBuf,
    args: Vec<String>,
    exit_code: i32,
}

impl ProcessRestartTrigger {
    /// Relaunch the current executable with the current arguments.
    pub fn current() -> Result<Self> {
        let executable =
            std::env::current_exe().context("Failed to resolve current executable")?;
        Ok(Self {
            executable,
            args: std::env::args().skip(1).collect(),
            exit_code: 0,
        })
    }

    pub fn new(executable: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            executable: executable.into(),
            args,
            exit_code: 0,
        }
    }

    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = exit_code;
        self
    }
}

#[async_trait]
impl RestartTrigger for ProcessRestartTrigger {
    async fn restart(&self) -> Result<()> {
        log::info!(
            "[Restart] Relaunching {} {:?}",
            self.executable.display(),
            self.args
        );

        let child = tokio::process::Command::new(&self.executable)
            .args(&self.args)
            .spawn()
            .with_context(|| format!("Failed to relaunch {:?}", self.executable))?;

        log::info!("[Restart] Spawned pid {:?}, exiting", child.id());
        std::process::exit(self.exit_code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_restart_with_missing_executable_errors_instead_of_exiting() {
        let trigger = ProcessRestartTrigger::new("/definitely/not/here/hotswap", vec![]);
        assert!(trigger.restart().await.is_err());
    }

    #[test]
    fn test_current_uses_running_executable() {
        let trigger = ProcessRestartTrigger::current().unwrap();
        assert_eq!(trigger.executable, std::env::current_exe().unwrap());
    }
}
