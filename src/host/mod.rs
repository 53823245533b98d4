//! Execution of host networking commands.
//!
//! Everything that touches kernel link state goes through [`LinkRunner`], so
//! the reconciler can be driven against a simulated host in tests.

use std::process::Command;
use tracing::{debug, trace, warn};

use crate::error::{Result, VnmError};

/// Runs `ip` sub-commands on the host.
pub trait LinkRunner: Send + Sync {
    /// Run `ip <args..>` and return its trimmed stdout.
    ///
    /// A non-zero exit status is reported as [`VnmError::CommandFailed`]
    /// carrying the combined output.
    fn run(&self, args: &[&str]) -> Result<String>;
}

/// [`LinkRunner`] backed by the iproute2 `ip` binary
#[derive(Debug, Clone)]
pub struct IpCommand {
    program: String,
}

impl IpCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn render(&self, args: &[&str]) -> String {
        format!("{} {}", self.program, args.join(" "))
    }
}

impl Default for IpCommand {
    fn default() -> Self {
        Self::new("ip")
    }
}

impl LinkRunner for IpCommand {
    fn run(&self, args: &[&str]) -> Result<String> {
        let command = self.render(args);
        debug!(command = %command, "Executing link command");

        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|source| VnmError::CommandSpawn {
                command: command.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            warn!(command = %command, exit_code, stderr = %stderr, "Command failed");

            let output = match (stdout.is_empty(), stderr.is_empty()) {
                (_, true) => stdout,
                (true, false) => stderr,
                (false, false) => format!("{}\n{}", stdout, stderr),
            };

            return Err(VnmError::CommandFailed {
                command,
                exit_code,
                output,
            });
        }

        trace!(command = %command, "Command succeeded");
        Ok(stdout)
    }
}

/// True if a failed command reported that the link already exists.
pub fn is_already_exists(err: &VnmError) -> bool {
    err.command_output()
        .map(|out| out.contains("File exists"))
        .unwrap_or(false)
}

/// True if a failed command reported that the link does not exist.
pub fn is_missing_device(err: &VnmError) -> bool {
    err.command_output()
        .map(|out| out.contains("Cannot find device") || out.contains("does not exist"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_command_success() {
        let runner = IpCommand::new("echo");
        let out = runner.run(&["link", "show"]).unwrap();
        assert_eq!(out, "link show");
    }

    #[test]
    fn test_ip_command_failure() {
        let runner = IpCommand::new("false");
        match runner.run(&["link"]) {
            Err(VnmError::CommandFailed { exit_code, command, .. }) => {
                assert_eq!(exit_code, 1);
                assert_eq!(command, "false link");
            }
            other => panic!("Expected CommandFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_ip_command_spawn_error() {
        let runner = IpCommand::new("/nonexistent/ip");
        assert!(matches!(
            runner.run(&["link"]),
            Err(VnmError::CommandSpawn { .. })
        ));
    }

    #[test]
    fn test_error_classification() {
        let exists = VnmError::CommandFailed {
            command: "ip link add".to_string(),
            exit_code: 2,
            output: "RTNETLINK answers: File exists".to_string(),
        };
        let missing = VnmError::CommandFailed {
            command: "ip link delete eth0.10".to_string(),
            exit_code: 1,
            output: "Cannot find device \"eth0.10\"".to_string(),
        };

        assert!(is_already_exists(&exists));
        assert!(!is_missing_device(&exists));
        assert!(is_missing_device(&missing));
        assert!(!is_already_exists(&VnmError::inventory("down")));
    }
}
