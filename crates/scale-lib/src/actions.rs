//! External VM lifecycle actions
//!
//! Power-state changes go through the external virtctl binary rather than
//! the cluster API, the same way operators drive VMs by hand. Dispatch
//! failures surface to the caller, which logs them and moves on.

use crate::tracker::{MembershipSet, VmIdentity};
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tokio::process::Command;

/// A supported lifecycle action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmAction {
    Start,
    Stop,
    Restart,
}

impl VmAction {
    /// Parse a configured action name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "start" => Some(VmAction::Start),
            "stop" => Some(VmAction::Stop),
            "restart" => Some(VmAction::Restart),
            _ => None,
        }
    }

    /// Verb passed to the external tool.
    pub fn verb(&self) -> &'static str {
        match self {
            VmAction::Start => "start",
            VmAction::Stop => "stop",
            VmAction::Restart => "restart",
        }
    }

    /// Set the action draws its targets from.
    ///
    /// Starting only makes sense for VMs previously told to stop; stopping
    /// and restarting draw from everything created this run.
    pub fn source_set(&self) -> MembershipSet {
        match self {
            VmAction::Start => MembershipSet::Stopped,
            VmAction::Stop | VmAction::Restart => MembershipSet::Created,
        }
    }

    /// Set dispatched targets are appended to.
    pub fn destination_set(&self) -> MembershipSet {
        match self {
            VmAction::Start | VmAction::Restart => MembershipSet::Started,
            VmAction::Stop => MembershipSet::Stopped,
        }
    }
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} {verb} {vm} exited with {status}")]
    Failed {
        tool: String,
        verb: &'static str,
        vm: String,
        status: std::process::ExitStatus,
    },
}

/// Dispatches a lifecycle action against a single VM.
#[async_trait]
pub trait ActionRunner: Send + Sync {
    async fn dispatch(&self, action: VmAction, vm: &VmIdentity) -> Result<(), ActionError>;
}

/// Runner that shells out: `<virtctl_path> <verb> <name> -n <namespace>`.
pub struct VirtctlRunner {
    virtctl_path: PathBuf,
}

impl VirtctlRunner {
    pub fn new(virtctl_path: impl Into<PathBuf>) -> Self {
        Self {
            virtctl_path: virtctl_path.into(),
        }
    }
}

#[async_trait]
impl ActionRunner for VirtctlRunner {
    async fn dispatch(&self, action: VmAction, vm: &VmIdentity) -> Result<(), ActionError> {
        let status = Command::new(&self.virtctl_path)
            .arg(action.verb())
            .arg(&vm.name)
            .arg("-n")
            .arg(&vm.namespace)
            .status()
            .await
            .map_err(|source| ActionError::Spawn {
                tool: self.virtctl_path.display().to_string(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(ActionError::Failed {
                tool: self.virtctl_path.display().to_string(),
                verb: action.verb(),
                vm: vm.to_string(),
                status,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_actions() {
        assert_eq!(VmAction::parse("start"), Some(VmAction::Start));
        assert_eq!(VmAction::parse("stop"), Some(VmAction::Stop));
        assert_eq!(VmAction::parse("restart"), Some(VmAction::Restart));
    }

    #[test]
    fn test_parse_unknown_action() {
        assert_eq!(VmAction::parse("destroy"), None);
        assert_eq!(VmAction::parse("Start"), None);
        assert_eq!(VmAction::parse(""), None);
    }

    #[test]
    fn test_membership_set_routing() {
        assert_eq!(VmAction::Start.source_set(), MembershipSet::Stopped);
        assert_eq!(VmAction::Start.destination_set(), MembershipSet::Started);

        assert_eq!(VmAction::Stop.source_set(), MembershipSet::Created);
        assert_eq!(VmAction::Stop.destination_set(), MembershipSet::Stopped);

        assert_eq!(VmAction::Restart.source_set(), MembershipSet::Created);
        assert_eq!(VmAction::Restart.destination_set(), MembershipSet::Started);
    }
}
