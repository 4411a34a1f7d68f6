//! VMI status aggregation
//!
//! A snapshot is recomputed from a live VMI list on every call; nothing is
//! cached between samples, so each log line reflects the cluster as it was
//! at that moment.

use crate::gateway::{ClusterGateway, GatewayError};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Canonical VMI phases, always present in a snapshot.
pub const VMI_PHASES: [&str; 5] = [
    "Running",
    "Scheduling",
    "Pending",
    "Unknown",
    "CrashLoopBackOff",
];

/// Counts of VMIs per canonical phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    counts: BTreeMap<&'static str, usize>,
}

impl StatusSnapshot {
    pub fn count(&self, phase: &str) -> usize {
        self.counts.get(phase).copied().unwrap_or(0)
    }

    pub fn running(&self) -> usize {
        self.count("Running")
    }

    /// Phase/count pairs in canonical order.
    pub fn entries(&self) -> impl Iterator<Item = (&'static str, usize)> + '_ {
        VMI_PHASES.iter().map(|phase| (*phase, self.count(phase)))
    }
}

/// Aggregates live VMI phases into per-status counts.
pub struct StatusReporter {
    gateway: Arc<dyn ClusterGateway>,
}

impl StatusReporter {
    pub fn new(gateway: Arc<dyn ClusterGateway>) -> Self {
        Self { gateway }
    }

    /// Query the cluster and count VMIs at each canonical phase.
    ///
    /// VMIs reporting a phase outside the canonical five are not counted.
    pub async fn snapshot(&self) -> Result<StatusSnapshot, GatewayError> {
        let vmis = self.gateway.list_vmis().await?;

        let mut counts: BTreeMap<&'static str, usize> =
            VMI_PHASES.iter().map(|phase| (*phase, 0)).collect();
        for vmi in &vmis {
            if let Some(count) = counts.get_mut(vmi.phase.as_str()) {
                *count += 1;
            }
        }
        Ok(StatusSnapshot { counts })
    }

    /// Snapshot and log one line per phase.
    pub async fn log_snapshot(&self) -> Result<StatusSnapshot, GatewayError> {
        let snapshot = self.snapshot().await?;
        for (phase, count) in snapshot.entries() {
            info!(phase = phase, vmis = count, "VMI status");
        }
        Ok(snapshot)
    }
}
