//! Corrective action via an external command

use async_trait::async_trait;
use curfew_host_api::{DeviceHost, HostError, HostResult};
use curfew_util::PackageId;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Placeholder replaced with the blocked package id in each argument
pub const PACKAGE_PLACEHOLDER: &str = "{package}";

/// Runs a configured argv to move the device away from a blocked package.
///
/// Without a command, corrective actions are only logged.
#[derive(Debug, Clone, Default)]
pub struct CommandDevice {
    argv: Option<Vec<String>>,
}

impl CommandDevice {
    pub fn new(argv: Option<Vec<String>>) -> Self {
        Self {
            argv: argv.filter(|a| !a.is_empty()),
        }
    }

    fn expand(&self, package: &PackageId) -> Option<Vec<String>> {
        self.argv.as_ref().map(|argv| {
            argv.iter()
                .map(|arg| arg.replace(PACKAGE_PLACEHOLDER, package.as_str()))
                .collect()
        })
    }
}

#[async_trait]
impl DeviceHost for CommandDevice {
    async fn redirect_home(&self, package: &PackageId) -> HostResult<()> {
        let Some(argv) = self.expand(package) else {
            warn!(package = %package, "No corrective command configured; block is advisory");
            return Ok(());
        };

        let (program, args) = argv
            .split_first()
            .ok_or_else(|| HostError::Internal("Empty argv".into()))?;

        debug!(package = %package, program = %program, "Running corrective command");

        let status = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await?;

        if status.success() {
            Ok(())
        } else {
            Err(HostError::ActionFailed(format!(
                "{} exited with {}",
                program, status
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_expansion() {
        let device = CommandDevice::new(Some(vec![
            "/usr/bin/curfew-home".into(),
            "--from={package}".into(),
        ]));

        assert_eq!(
            device.expand(&"com.example.game".into()).unwrap(),
            vec![
                "/usr/bin/curfew-home".to_string(),
                "--from=com.example.game".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn without_command_is_noop() {
        let device = CommandDevice::new(None);
        assert!(device.redirect_home(&"com.example.game".into()).await.is_ok());

        let device = CommandDevice::new(Some(vec![]));
        assert!(device.redirect_home(&"com.example.game".into()).await.is_ok());
    }

    #[tokio::test]
    async fn command_status_is_checked() {
        let ok = CommandDevice::new(Some(vec!["sh".into(), "-c".into(), "exit 0".into()]));
        assert!(ok.redirect_home(&"com.example.game".into()).await.is_ok());

        let failing = CommandDevice::new(Some(vec!["sh".into(), "-c".into(), "exit 3".into()]));
        assert!(matches!(
            failing.redirect_home(&"com.example.game".into()).await,
            Err(HostError::ActionFailed(_))
        ));
    }

    #[tokio::test]
    async fn missing_program_is_io_error() {
        let device = CommandDevice::new(Some(vec!["/nonexistent/curfew-home".into()]));
        assert!(matches!(
            device.redirect_home(&"com.example.game".into()).await,
            Err(HostError::Io(_))
        ));
    }
}
