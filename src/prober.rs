use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use async_trait::async_trait;
use log::debug;
use regex::Regex;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeTarget {
    pub address: String,
    pub label: String,
    pub probe_count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeResult {
    pub target_label: String,
    pub reachable: bool,
}

impl ProbeResult {
    pub fn from_replies(target: &ProbeTarget, received: u32) -> Self {
        ProbeResult {
            target_label: target.label.clone(),
            reachable: received > 0,
        }
    }

    pub fn unreachable(target: &ProbeTarget) -> Self {
        Self::from_replies(target, 0)
    }
}

/// A single reachability check. Implementations never fail: anything that
/// goes wrong is reported as an unreachable result.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, target: &ProbeTarget) -> ProbeResult;
}

/// Probes with the system `ping` binary.
#[derive(Debug, Clone)]
pub struct PingProber {
    program: String,
    attempt_timeout: Duration,
}

impl PingProber {
    pub fn new(program: &str, attempt_timeout: Duration) -> Self {
        PingProber {
            program: program.to_string(),
            attempt_timeout,
        }
    }

    fn command(&self, target: &ProbeTarget) -> tokio::process::Command {
        // -W is seconds on Linux, milliseconds on macOS
        let wait = if cfg!(target_os = "macos") {
            self.attempt_timeout.as_millis().max(1).to_string()
        } else {
            self.attempt_timeout.as_secs().max(1).to_string()
        };

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.arg("-c")
            .arg(target.probe_count.to_string())
            .arg("-W")
            .arg(wait)
            .arg(&target.address)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    async fn replies(&self, target: &ProbeTarget) -> anyhow::Result<u32> {
        let limit = self
            .attempt_timeout
            .saturating_mul(target.probe_count)
            .saturating_add(self.attempt_timeout);
        let output = tokio::time::timeout(limit, self.command(target).output())
            .await
            .map_err(|_| anyhow!("ping did not finish within {:?}", limit))?
            .with_context(|| format!("unable to run {}", self.program))?;

        // ping exits non-zero when nothing answers, so only the summary counts
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_received(&stdout).ok_or_else(|| {
            anyhow!(
                "no reply summary in ping output (exit status {})",
                output.status
            )
        })
    }
}

#[async_trait]
impl Prober for PingProber {
    async fn probe(&self, target: &ProbeTarget) -> ProbeResult {
        match self.replies(target).await {
            Ok(received) => {
                debug!(
                    "{} ({}): {}/{} replies",
                    target.label, target.address, received, target.probe_count
                );
                ProbeResult::from_replies(target, received)
            }
            Err(err) => {
                debug!("{} ({}) unreachable: {:#}", target.label, target.address, err);
                ProbeResult::unreachable(target)
            }
        }
    }
}

fn received_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?P<recv_count>[0-9]+) (?:packets )?received").expect("valid regex")
    })
}

/// Extracts the reply count from a ping summary line.
fn parse_received(output: &str) -> Option<u32> {
    received_pattern()
        .captures(output)
        .and_then(|caps| caps.name("recv_count"))
        .and_then(|count| count.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(address: &str, label: &str) -> ProbeTarget {
        ProbeTarget {
            address: address.to_string(),
            label: label.to_string(),
            probe_count: 3,
        }
    }

    #[test]
    fn test_parse_linux_summary() {
        let output = "PING 10.0.0.5 (10.0.0.5) 56(84) bytes of data.\n\
            64 bytes from 10.0.0.5: icmp_seq=1 ttl=64 time=3.12 ms\n\
            64 bytes from 10.0.0.5: icmp_seq=3 ttl=64 time=2.90 ms\n\
            \n\
            --- 10.0.0.5 ping statistics ---\n\
            3 packets transmitted, 2 received, 33.3333% packet loss, time 2003ms\n";
        assert_eq!(parse_received(output), Some(2));
    }

    #[test]
    fn test_parse_macos_summary() {
        let output = "--- 10.0.0.9 ping statistics ---\n\
            3 packets transmitted, 0 packets received, 100.0% packet loss\n";
        assert_eq!(parse_received(output), Some(0));
    }

    #[test]
    fn test_parse_busybox_summary() {
        let output = "--- localhost ping statistics ---\n\
            3 packets transmitted, 3 packets received, 0% packet loss\n\
            round-trip min/avg/max = 0.049/0.061/0.075 ms\n";
        assert_eq!(parse_received(output), Some(3));
    }

    #[test]
    fn test_parse_without_summary() {
        assert_eq!(parse_received("ping: unknown host localhostzz"), None);
        assert_eq!(parse_received(""), None);
    }

    #[test]
    fn test_parse_unknown_host_output() {
        // iputils, then macOS
        assert_eq!(
            parse_received("ping: host.invalid: Name or service not known\n"),
            None
        );
        assert_eq!(
            parse_received("ping: host.invalid: Temporary failure in name resolution\n"),
            None
        );
        assert_eq!(
            parse_received("ping: cannot resolve host.invalid: Unknown host\n"),
            None
        );
    }

    #[test]
    fn test_reachable_when_any_reply() {
        let kitchen = target("10.0.0.5", "kitchen");
        assert!(ProbeResult::from_replies(&kitchen, 2).reachable);
        assert!(!ProbeResult::from_replies(&kitchen, 0).reachable);
        assert_eq!(ProbeResult::unreachable(&kitchen).target_label, "kitchen");
    }

    #[tokio::test]
    async fn test_missing_program_is_unreachable() {
        let prober = PingProber::new("/nonexistent/locator-ping", Duration::from_secs(1));
        let kitchen = target("10.0.0.5", "kitchen");

        let err = prober.replies(&kitchen).await.unwrap_err();
        assert!(format!("{err:#}").contains("unable to run /nonexistent/locator-ping"));
        assert_eq!(prober.probe(&kitchen).await, ProbeResult::unreachable(&kitchen));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_without_summary_is_unreachable() {
        // echo prints its arguments, which never contain a reply summary
        let prober = PingProber::new("echo", Duration::from_secs(1));
        let kitchen = target("10.0.0.5", "kitchen");

        let err = prober.replies(&kitchen).await.unwrap_err();
        assert!(format!("{err:#}").contains("no reply summary"));
        assert_eq!(prober.probe(&kitchen).await, ProbeResult::unreachable(&kitchen));
    }
}
