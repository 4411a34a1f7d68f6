//! Node CPU capacity throttling
//!
//! Creation pauses while a node is saturated: the throttle samples the
//! node's idle-CPU percentage and only returns once idle climbs back over
//! the threshold. There is deliberately no timeout; a saturated node stalls
//! the campaign until it recovers.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

/// Idle percentage below which a node counts as saturated.
pub const MIN_IDLE_PERCENT: f64 = 20.0;

/// Field position of the idle percentage in top's Cpu line.
const IDLE_FIELD_INDEX: usize = 7;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to run probe command on {node}: {source}")]
    Command {
        node: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no Cpu line in probe output from {node}")]
    MissingCpuLine { node: String },

    #[error("unreadable idle field in probe output from {node}: {field}")]
    BadIdleField { node: String, field: String },
}

/// Samples a node's idle-CPU percentage.
#[async_trait]
pub trait CpuProbe: Send + Sync {
    async fn idle_percent(&self, node: &str) -> Result<f64, ProbeError>;
}

/// Probe that runs `top -bn1` on the node over ssh.
///
/// Idle is the 8th whitespace-delimited field of the line containing "Cpu",
/// which ties this probe to top's exact column layout.
pub struct SshTopProbe;

#[async_trait]
impl CpuProbe for SshTopProbe {
    async fn idle_percent(&self, node: &str) -> Result<f64, ProbeError> {
        let output = Command::new("ssh")
            .args(["-o", "StrictHostKeyChecking=no"])
            .arg(format!("root@{node}"))
            .args(["top", "-bn1"])
            .output()
            .await
            .map_err(|source| ProbeError::Command {
                node: node.to_string(),
                source,
            })?;

        parse_idle(&String::from_utf8_lossy(&output.stdout), node)
    }
}

fn parse_idle(output: &str, node: &str) -> Result<f64, ProbeError> {
    let line = output
        .lines()
        .find(|line| line.contains("Cpu"))
        .ok_or_else(|| ProbeError::MissingCpuLine {
            node: node.to_string(),
        })?;

    let field = line
        .split_whitespace()
        .nth(IDLE_FIELD_INDEX)
        .ok_or_else(|| ProbeError::BadIdleField {
            node: node.to_string(),
            field: String::new(),
        })?;

    field.parse::<f64>().map_err(|_| ProbeError::BadIdleField {
        node: node.to_string(),
        field: field.to_string(),
    })
}

/// Blocks until a node's idle CPU climbs back over the threshold.
pub struct CapacityThrottle {
    probe: Arc<dyn CpuProbe>,
    poll_interval: Duration,
}

impl CapacityThrottle {
    pub fn new(probe: Arc<dyn CpuProbe>, poll_interval: Duration) -> Self {
        Self {
            probe,
            poll_interval,
        }
    }

    /// Sample the node, re-polling while idle is below [`MIN_IDLE_PERCENT`].
    ///
    /// A probe failure ends the wait: a node that cannot be sampled must not
    /// stall the run forever.
    pub async fn wait_for_idle(&self, node: &str) {
        loop {
            let idle = match self.probe.idle_percent(node).await {
                Ok(idle) => idle,
                Err(err) => {
                    warn!(node = %node, error = %err, "CPU probe failed, skipping throttle check");
                    return;
                }
            };

            if idle >= MIN_IDLE_PERCENT {
                info!(node = %node, idle_percent = idle, "Node idle CPU ok");
                return;
            }

            info!(
                node = %node,
                idle_percent = idle,
                "CPU usage above 80%, waiting for node to recover"
            );
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Probe replaying a fixed sample sequence, then staying fully idle.
    struct ScriptedProbe {
        samples: Mutex<Vec<f64>>,
        calls: AtomicUsize,
    }

    impl ScriptedProbe {
        fn new(samples: Vec<f64>) -> Self {
            Self {
                samples: Mutex::new(samples),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CpuProbe for ScriptedProbe {
        async fn idle_percent(&self, _node: &str) -> Result<f64, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut samples = self.samples.lock().unwrap();
            if samples.is_empty() {
                Ok(100.0)
            } else {
                Ok(samples.remove(0))
            }
        }
    }

    #[tokio::test]
    async fn test_polls_until_idle_recovers() {
        let probe = Arc::new(ScriptedProbe::new(vec![15.0, 18.0, 22.0]));
        let throttle = CapacityThrottle::new(probe.clone(), Duration::from_millis(1));

        throttle.wait_for_idle("worker-0").await;

        // two saturated samples force two sleeps, the third returns
        assert_eq!(probe.calls(), 3);
    }

    #[tokio::test]
    async fn test_returns_immediately_when_idle() {
        let probe = Arc::new(ScriptedProbe::new(vec![95.0]));
        let throttle = CapacityThrottle::new(probe.clone(), Duration::from_millis(1));

        throttle.wait_for_idle("worker-0").await;

        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test]
    async fn test_threshold_is_inclusive() {
        let probe = Arc::new(ScriptedProbe::new(vec![20.0]));
        let throttle = CapacityThrottle::new(probe.clone(), Duration::from_millis(1));

        throttle.wait_for_idle("worker-0").await;

        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test]
    async fn test_probe_failure_ends_wait() {
        struct FailingProbe;

        #[async_trait]
        impl CpuProbe for FailingProbe {
            async fn idle_percent(&self, node: &str) -> Result<f64, ProbeError> {
                Err(ProbeError::MissingCpuLine {
                    node: node.to_string(),
                })
            }
        }

        let throttle =
            CapacityThrottle::new(Arc::new(FailingProbe), Duration::from_millis(1));
        throttle.wait_for_idle("worker-0").await;
    }

    #[test]
    fn test_parse_idle_from_top_output() {
        let output = "top - 10:01:02 up 3 days\n\
                      Tasks: 200 total\n\
                      %Cpu(s): 71.2 us, 3.6 sy, 0.0 ni, 22.9 id, 0.1 wa\n\
                      MiB Mem : 64000 total";
        assert_eq!(parse_idle(output, "worker-0").unwrap(), 22.9);
    }

    #[test]
    fn test_parse_idle_missing_cpu_line() {
        let err = parse_idle("no such line here", "worker-0").unwrap_err();
        assert!(matches!(err, ProbeError::MissingCpuLine { .. }));
    }

    #[test]
    fn test_parse_idle_bad_field() {
        let output = "%Cpu(s): 71.2 us, 3.6 sy, 0.0 ni, junk wa";
        let err = parse_idle(output, "worker-0").unwrap_err();
        assert!(matches!(err, ProbeError::BadIdleField { .. }));
    }
}
