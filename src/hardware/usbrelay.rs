//! Subprocess-backed relay controller
//!
//! Wraps the external relay control tool (`usbrelay` by default). Query form
//! runs the tool with no arguments and parses one `XXXXX_N=0|1` line per
//! relay; set form passes a single `XXXXX_N=0|1` argument. Tool failures are
//! logged and swallowed: a failed query still yields whatever lines were
//! written before the failure, and a failed set simply leaves the relay as-is.

use super::{RelayController, RelaySnapshot};
use async_trait::async_trait;
use regex::Regex;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Relay controller shelling out to the hardware control tool
pub struct UsbRelayTool {
    program: String,
    command_timeout: Duration,
    line_pattern: Regex,
}

impl UsbRelayTool {
    pub fn new(program: impl Into<String>, command_timeout: Duration) -> Self {
        Self {
            program: program.into(),
            command_timeout,
            // Matches the tool's report lines, e.g. HURTM_1=1
            line_pattern: Regex::new(r"^([A-Z]{5}_[0-9])=([01])$")
                .expect("relay line pattern is valid"),
        }
    }

    /// Parse tool stdout into a snapshot; non-matching lines are ignored
    fn parse_snapshot(&self, stdout: &str) -> RelaySnapshot {
        let mut snapshot = RelaySnapshot::new();
        for line in stdout.lines() {
            if let Some(captures) = self.line_pattern.captures(line.trim_end()) {
                let relay_id = &captures[1];
                let on = &captures[2] == "1";
                snapshot.insert(relay_id, on);
            } else if !line.trim().is_empty() {
                debug!(line = %line, "Ignoring unrecognized relay tool output line");
            }
        }
        snapshot
    }

    /// Run the tool with the given arguments, bounded by the command timeout.
    /// Returns stdout and whether the invocation succeeded (exit code 0).
    async fn invoke(&self, args: &[&str]) -> (String, bool) {
        // Dropping the future on timeout must also kill the child, or a hung
        // tool keeps holding the relay device
        let run = Command::new(&self.program)
            .args(args)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.command_timeout, run).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(tool = %self.program, error = %e, "Failed to invoke relay tool");
                return (String::new(), false);
            }
            Err(_) => {
                warn!(
                    tool = %self.program,
                    timeout_secs = self.command_timeout.as_secs(),
                    "Relay tool invocation timed out"
                );
                return (String::new(), false);
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            warn!(
                tool = %self.program,
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim_end(),
                "Relay tool exited with failure"
            );
            return (stdout, false);
        }
        (stdout, true)
    }
}

#[async_trait]
impl RelayController for UsbRelayTool {
    async fn read_all(&self) -> RelaySnapshot {
        let (stdout, ok) = self.invoke(&[]).await;
        // Lines written before a mid-run failure still count; reconciliation
        // proceeds with the partial (possibly empty) snapshot.
        let snapshot = self.parse_snapshot(&stdout);
        if ok {
            debug!(relays = snapshot.len(), "Read hardware snapshot");
        } else {
            warn!(
                relays = snapshot.len(),
                "Hardware query failed; continuing with partial snapshot"
            );
        }
        snapshot
    }

    async fn set(&self, relay_id: &str, on: bool) {
        let argument = format!("{}={}", relay_id, if on { "1" } else { "0" });
        let (_, ok) = self.invoke(&[&argument]).await;
        if ok {
            debug!(relay = %relay_id, on = on, "Switched relay");
        } else {
            warn!(relay = %relay_id, on = on, "Failed to switch relay");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::RelayState;

    fn tool() -> UsbRelayTool {
        UsbRelayTool::new("usbrelay", Duration::from_secs(5))
    }

    #[test]
    fn test_parse_snapshot_basic() {
        let snapshot = tool().parse_snapshot("HURTM_1=1\nHURTM_2=0\n");
        assert_eq!(snapshot.state("HURTM_1"), RelayState::On);
        assert_eq!(snapshot.state("HURTM_2"), RelayState::Off);
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn test_parse_snapshot_ignores_noise() {
        let output = "\
Device found: path=/dev/hidraw2\n\
HURTM_1=1\n\
hurtm_2=0\n\
HURT_3=1\n\
HURTM_4=2\n\
HURTM_5 = 1\n\
\n\
HURTM_6=0\n";
        let snapshot = tool().parse_snapshot(output);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.state("HURTM_1"), RelayState::On);
        assert_eq!(snapshot.state("HURTM_6"), RelayState::Off);
        assert_eq!(snapshot.state("hurtm_2"), RelayState::Unknown);
        assert_eq!(snapshot.state("HURTM_4"), RelayState::Unknown);
    }

    #[test]
    fn test_parse_snapshot_empty_output() {
        let snapshot = tool().parse_snapshot("");
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_parse_snapshot_trailing_whitespace() {
        // CRLF output from the tool still parses
        let snapshot = tool().parse_snapshot("HURTM_1=0\r\n");
        assert_eq!(snapshot.state("HURTM_1"), RelayState::Off);
    }

    #[tokio::test]
    async fn test_read_all_missing_tool_yields_empty_snapshot() {
        let tool = UsbRelayTool::new(
            "/nonexistent/relay-tool-for-tests",
            Duration::from_secs(1),
        );
        let snapshot = tool.read_all().await;
        assert!(snapshot.is_empty(), "Missing tool must fail soft");
    }

    #[tokio::test]
    async fn test_set_missing_tool_does_not_panic() {
        let tool = UsbRelayTool::new(
            "/nonexistent/relay-tool-for-tests",
            Duration::from_secs(1),
        );
        tool.set("HURTM_1", true).await;
    }

    #[tokio::test]
    async fn test_read_all_parses_real_subprocess_output() {
        // `echo` stands in for the hardware tool: prints a report line, exits 0
        let tool = UsbRelayTool::new("echo", Duration::from_secs(5));
        // invoke() with no args: echo prints an empty line
        let snapshot = tool.read_all().await;
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_timed_out_tool_is_killed() {
        let pid_file = tempfile::NamedTempFile::new().unwrap();
        let pid_path = pid_file.path().display().to_string();
        let script = format!("echo $$ > {pid_path}; sleep 30");

        let tool = UsbRelayTool::new("sh", Duration::from_millis(200));
        let (_, ok) = tool.invoke(&["-c", &script]).await;
        assert!(!ok, "Hung tool must report invocation failure");

        let pid = std::fs::read_to_string(&pid_path).unwrap().trim().to_string();
        assert!(!pid.is_empty(), "Tool should have written its pid");

        // SIGKILL lands when the timed-out future is dropped; allow a moment
        // for delivery and reaping (a zombie counts as dead)
        let mut alive = true;
        for _ in 0..50 {
            alive = match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
                Ok(stat) => stat.split_whitespace().nth(2) != Some("Z"),
                Err(_) => false,
            };
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!alive, "Tool process must not outlive the invocation timeout");
    }

    #[tokio::test]
    async fn test_nonzero_exit_keeps_partial_output() {
        // sh prints one valid line then fails; the parsed prefix survives
        let (stdout, ok) = UsbRelayTool::new("sh", Duration::from_secs(5))
            .invoke(&["-c", "echo HURTM_1=1; exit 3"])
            .await;
        assert!(!ok);
        let snapshot = tool().parse_snapshot(&stdout);
        assert_eq!(snapshot.state("HURTM_1"), RelayState::On);
    }
}
