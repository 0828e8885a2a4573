//! Reachability Probe
//!
//! Single ICMP echo against a remote address. Used only to decide
//! whether a recorded seed is stale, so every failure to run the probe
//! counts as "unreachable".

use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Liveness check of a remote address
#[async_trait::async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn is_reachable(&self, address: &str) -> bool;
}

/// Probe backed by the system `ping` binary
#[derive(Debug, Clone)]
pub struct PingProbe {
    program: String,
    timeout: Duration,
}

impl PingProbe {
    pub fn new(timeout: Duration) -> Self {
        Self::with_program("ping", timeout)
    }

    /// Use a specific ping binary
    pub fn with_program(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// Arguments for one echo request on this OS
    fn args(&self, address: &str) -> Vec<String> {
        let secs = self.timeout.as_secs().max(1);
        if cfg!(windows) {
            vec![
                "-n".into(),
                "1".into(),
                "-w".into(),
                (secs * 1000).to_string(),
                address.into(),
            ]
        } else {
            vec![
                "-c".into(),
                "1".into(),
                "-W".into(),
                secs.to_string(),
                address.into(),
            ]
        }
    }
}

#[async_trait::async_trait]
impl ReachabilityProbe for PingProbe {
    async fn is_reachable(&self, address: &str) -> bool {
        // A leading dash would be taken as an option
        if address.is_empty() || address.starts_with('-') {
            tracing::warn!("Refusing to probe suspicious address '{}'", address);
            return false;
        }

        let mut command = Command::new(&self.program);
        command
            .args(self.args(address))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        // Leave the OS a second beyond ping's own deadline
        let deadline = self.timeout + Duration::from_secs(1);
        match tokio::time::timeout(deadline, command.status()).await {
            Ok(Ok(status)) => {
                tracing::debug!("Ping {} exited with {}", address, status);
                status.success()
            }
            Ok(Err(e)) => {
                tracing::warn!("Could not run {}: {}", self.program, e);
                false
            }
            Err(_) => {
                tracing::debug!("Ping {} timed out", address);
                false
            }
        }
    }
}
