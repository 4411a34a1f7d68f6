//! Campaign settings loading and validation
//!
//! A campaign is described by a single YAML file: which scenario to run, the
//! base VM template, per-VM constraint overrides, scale sizes, and pacing.
//! Everything is resolved once at startup into an immutable [`Settings`]
//! value; nothing re-reads configuration mid-run.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// Which scale scenario a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    /// Saturate one node with sequentially created VMs.
    SingleNode,
    /// Ramp up across all compute nodes in bounded concurrent groups.
    MultiNode,
    /// Bulk-schedule VMs, sharding namespaces at the node device ceiling.
    NamespaceSharded,
}

/// Per-VM constraint overrides merged into the base template.
///
/// An absent field leaves the template default untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VmConstraints {
    /// Pin the VM to a node by hostname.
    pub node_selector: Option<String>,
    /// Whether the VM definition asks the cluster to run it immediately.
    pub running_state: Option<bool>,
    /// CPU topology merged verbatim into the domain spec.
    pub cpu: Option<serde_json::Value>,
    /// Memory request, e.g. "64Mi".
    pub memory: Option<String>,
}

/// Post-creation lifecycle action plan.
#[derive(Debug, Clone, Deserialize)]
pub struct LifecyclePlan {
    /// Action names executed in order, e.g. ["stop", "start"].
    pub actions: Vec<String>,
    /// How many VMs each action targets.
    pub vm_count: usize,
}

/// Resolved campaign settings, immutable once loaded.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub scenario: Scenario,

    /// Path to the base VM manifest.
    pub vm_template: PathBuf,

    /// External tool driving VM power state.
    #[serde(default = "default_virtctl_path")]
    pub virtctl_path: PathBuf,

    /// Node to pin the single-node scenario to. Unset means the first ready
    /// compute node.
    #[serde(default)]
    pub node: Option<String>,

    /// Label selector for compute nodes.
    #[serde(default = "default_node_selector")]
    pub node_selector: String,

    #[serde(default)]
    pub constraints: VmConstraints,

    /// VMs per node for the single-node and multi-node scenarios.
    #[serde(default = "default_vms_per_node")]
    pub vms_per_node: usize,

    /// Total VMs for the namespace-sharded scenario.
    #[serde(default = "default_total_vms")]
    pub total_vms: usize,

    /// First VM index to create, for resuming a partially built node.
    #[serde(default)]
    pub vm_offset: usize,

    /// Sample and log VMI status every this many VMs.
    #[serde(default = "default_status_interval")]
    pub status_interval: usize,

    /// Pause before each status sample, in seconds.
    #[serde(default = "default_status_delay_secs")]
    pub status_delay_secs: u64,

    /// Pause after each VM submission and each action dispatch, in seconds.
    #[serde(default = "default_creation_pause_secs")]
    pub creation_pause_secs: u64,

    /// Interval between idle-CPU samples while a node is saturated.
    #[serde(default = "default_cpu_poll_secs")]
    pub cpu_poll_secs: u64,

    /// Interval between running-VMI polls before the lifecycle phase.
    #[serde(default = "default_readiness_poll_secs")]
    pub readiness_poll_secs: u64,

    /// Poll budget before the lifecycle phase proceeds regardless.
    #[serde(default = "default_readiness_poll_attempts")]
    pub readiness_poll_attempts: u32,

    #[serde(default = "default_vm_prefix")]
    pub vm_prefix: String,

    #[serde(default = "default_namespace_prefix")]
    pub namespace_prefix: String,

    /// Absent plan means no post-creation actions run.
    #[serde(default)]
    pub lifecycle: Option<LifecyclePlan>,
}

fn default_virtctl_path() -> PathBuf {
    PathBuf::from("/usr/bin/virtctl")
}

fn default_node_selector() -> String {
    "node-role.kubernetes.io/compute=true".to_string()
}

fn default_vms_per_node() -> usize {
    110
}

fn default_total_vms() -> usize {
    1100
}

fn default_status_interval() -> usize {
    10
}

fn default_status_delay_secs() -> u64 {
    30
}

fn default_creation_pause_secs() -> u64 {
    1
}

fn default_cpu_poll_secs() -> u64 {
    10
}

fn default_readiness_poll_secs() -> u64 {
    60
}

fn default_readiness_poll_attempts() -> u32 {
    10
}

fn default_vm_prefix() -> String {
    "scale-vm-".to_string()
}

fn default_namespace_prefix() -> String {
    "scale-ns-".to_string()
}

impl Settings {
    /// Load settings from a file, with `SCALE_*` environment overrides.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let cfg = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("SCALE"))
            .build()?;

        let settings: Settings = cfg.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.status_interval == 0 {
            return Err(SettingsError::Invalid(
                "status_interval must be at least 1".to_string(),
            ));
        }
        let uses_per_node = matches!(self.scenario, Scenario::SingleNode | Scenario::MultiNode);
        if uses_per_node && self.vm_offset >= self.vms_per_node {
            return Err(SettingsError::Invalid(format!(
                "vm_offset {} leaves no VMs to create below vms_per_node {}",
                self.vm_offset, self.vms_per_node
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
scenario: single_node
vm_template: manifests/cirros_vm.yaml
node: worker-0
constraints:
  running_state: false
  memory: 64Mi
vms_per_node: 5
lifecycle:
  actions: [stop, start]
  vm_count: 2
"#;

    fn write_settings(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_sample_settings() {
        let file = write_settings(SAMPLE);
        let settings = Settings::load(file.path()).unwrap();

        assert_eq!(settings.scenario, Scenario::SingleNode);
        assert_eq!(settings.node.as_deref(), Some("worker-0"));
        assert_eq!(settings.vms_per_node, 5);
        assert_eq!(settings.constraints.running_state, Some(false));
        assert_eq!(settings.constraints.memory.as_deref(), Some("64Mi"));

        let plan = settings.lifecycle.unwrap();
        assert_eq!(plan.actions, vec!["stop", "start"]);
        assert_eq!(plan.vm_count, 2);
    }

    #[test]
    fn test_defaults_applied() {
        let file = write_settings(
            "scenario: namespace_sharded\nvm_template: vm.yaml\nvms_per_node: 10\n",
        );
        let settings = Settings::load(file.path()).unwrap();

        assert_eq!(settings.total_vms, 1100);
        assert_eq!(settings.status_interval, 10);
        assert_eq!(settings.status_delay_secs, 30);
        assert_eq!(settings.creation_pause_secs, 1);
        assert_eq!(settings.vm_prefix, "scale-vm-");
        assert_eq!(settings.namespace_prefix, "scale-ns-");
        assert!(settings.lifecycle.is_none());
    }

    #[test]
    fn test_unknown_scenario_rejected() {
        let file = write_settings("scenario: tornado\nvm_template: vm.yaml\n");
        assert!(Settings::load(file.path()).is_err());
    }

    #[test]
    fn test_zero_status_interval_rejected() {
        let file = write_settings(
            "scenario: single_node\nvm_template: vm.yaml\nstatus_interval: 0\n",
        );
        let err = Settings::load(file.path()).unwrap_err();
        assert!(matches!(err, SettingsError::Invalid(_)));
    }

    #[test]
    fn test_offset_past_count_rejected() {
        let file = write_settings(
            "scenario: single_node\nvm_template: vm.yaml\nvms_per_node: 5\nvm_offset: 5\n",
        );
        assert!(Settings::load(file.path()).is_err());
    }
}
