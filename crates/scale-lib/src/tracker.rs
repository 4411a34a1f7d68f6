//! Lifecycle membership bookkeeping
//!
//! Three append-only identity sets back the lifecycle action phase: every VM
//! ever submitted, every VM told to stop, and every VM told to start or
//! restart. Selection is FIFO on insertion order so repeated runs pick the
//! same subsets.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// A created VM, addressed by name and namespace. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VmIdentity {
    pub name: String,
    pub namespace: String,
}

impl VmIdentity {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for VmIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// The membership sets a VM identity can be recorded in.
///
/// `Created` is a superset of the others: identities are appended to the
/// action sets without ever being removed from `Created`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipSet {
    Created,
    Stopped,
    Started,
}

impl MembershipSet {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipSet::Created => "created",
            MembershipSet::Stopped => "stopped",
            MembershipSet::Started => "started",
        }
    }
}

impl fmt::Display for MembershipSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("{set} set has {available} members, {requested} requested")]
    InsufficientMembers {
        set: MembershipSet,
        requested: usize,
        available: usize,
    },
}

/// Append-only record of which VMs sit in which lifecycle bucket.
#[derive(Debug, Default)]
pub struct LifecycleTracker {
    created: Vec<VmIdentity>,
    stopped: Vec<VmIdentity>,
    started: Vec<VmIdentity>,
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn members(&self, set: MembershipSet) -> &Vec<VmIdentity> {
        match set {
            MembershipSet::Created => &self.created,
            MembershipSet::Stopped => &self.stopped,
            MembershipSet::Started => &self.started,
        }
    }

    fn members_mut(&mut self, set: MembershipSet) -> &mut Vec<VmIdentity> {
        match set {
            MembershipSet::Created => &mut self.created,
            MembershipSet::Stopped => &mut self.stopped,
            MembershipSet::Started => &mut self.started,
        }
    }

    /// Append an identity to a set.
    pub fn record(&mut self, set: MembershipSet, identity: VmIdentity) {
        self.members_mut(set).push(identity);
    }

    /// Append identities to a set, preserving their order.
    pub fn record_all(&mut self, set: MembershipSet, identities: impl IntoIterator<Item = VmIdentity>) {
        self.members_mut(set).extend(identities);
    }

    /// The first `count` members of a set in insertion order.
    ///
    /// Fails without touching any set when the source has too few members.
    pub fn select(
        &self,
        set: MembershipSet,
        count: usize,
    ) -> Result<Vec<VmIdentity>, TrackerError> {
        let members = self.members(set);
        if members.len() < count {
            return Err(TrackerError::InsufficientMembers {
                set,
                requested: count,
                available: members.len(),
            });
        }
        Ok(members[..count].to_vec())
    }

    pub fn len(&self, set: MembershipSet) -> usize {
        self.members(set).len()
    }

    pub fn is_empty(&self, set: MembershipSet) -> bool {
        self.members(set).is_empty()
    }
}
