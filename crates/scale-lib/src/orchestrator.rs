//! Scale-out orchestration engine
//!
//! Drives one of three scale scenarios to completion, then the optional
//! lifecycle-action phase:
//!
//! - single-node: sequential creation pinned to one node
//! - multi-node ramp-up: bounded groups of concurrent per-node workers
//! - namespace-sharded: bulk scheduling, sharding namespaces at the node
//!   device ceiling
//!
//! Individual VM or dispatch failures are logged and the campaign keeps
//! going; only scenario-planning queries (node list, device ceiling) abort
//! the run.

use crate::actions::{ActionRunner, VmAction};
use crate::gateway::{ClusterGateway, GatewayError};
use crate::reporter::StatusReporter;
use crate::settings::{Scenario, Settings};
use crate::template::{self, TemplateError};
use crate::throttle::{CapacityThrottle, CpuProbe};
use crate::tracker::{LifecycleTracker, MembershipSet, VmIdentity};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Maximum number of nodes provisioned concurrently within one group.
pub const MAX_CONCURRENT_NODES: usize = 10;

/// Partition nodes into contiguous groups of at most `max` members.
pub fn node_groups(nodes: &[String], max: usize) -> Vec<Vec<String>> {
    nodes
        .chunks(max.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Shared per-worker provisioning context.
///
/// Read-only after construction, so workers share one instance through an
/// `Arc` and all membership mutation stays in the orchestrator.
struct Provisioner {
    gateway: Arc<dyn ClusterGateway>,
    actions: Arc<dyn ActionRunner>,
    reporter: StatusReporter,
    throttle: CapacityThrottle,
    template: Value,
    settings: Settings,
}

impl Provisioner {
    fn namespace_name(&self, counter: usize) -> String {
        format!("{}{}", self.settings.namespace_prefix, counter)
    }

    /// Create one VM, pace, and periodically sample status.
    async fn add_vm(
        &self,
        index: usize,
        namespace: &str,
        name: &str,
        node: Option<&str>,
    ) -> VmIdentity {
        let mut constraints = self.settings.constraints.clone();
        if let Some(node) = node {
            constraints.node_selector = Some(node.to_string());
        }

        let manifest = template::bind(&self.template, name, &constraints);
        if let Err(err) = self.gateway.create_vm(&manifest, namespace).await {
            error!(vm = %name, namespace = %namespace, error = %err, "VM creation failed");
        }

        let identity = VmIdentity::new(name, namespace);
        // VMs stay powered off unless the campaign asks for running state
        if !constraints.running_state.unwrap_or(false) {
            if let Err(err) = self.actions.dispatch(VmAction::Stop, &identity).await {
                warn!(vm = %identity, error = %err, "Initial stop dispatch failed");
            }
        }

        sleep_secs(self.settings.creation_pause_secs).await;
        if index > 0 && index % self.settings.status_interval == 0 {
            sleep_secs(self.settings.status_delay_secs).await;
            if let Err(err) = self.reporter.log_snapshot().await {
                warn!(error = %err, "Status snapshot failed");
            }
        }
        identity
    }

    /// Provision one node's worth of VMs into a namespace.
    ///
    /// The single-node scenario body, and the per-node worker body of the
    /// ramp-up scenario.
    async fn provision_node(&self, namespace: &str, node: &str, count: usize) -> Vec<VmIdentity> {
        info!(
            namespace = %namespace,
            node = %node,
            vms = count.saturating_sub(self.settings.vm_offset),
            "Provisioning node"
        );
        if let Err(err) = self.gateway.create_namespace(namespace).await {
            error!(namespace = %namespace, error = %err, "Namespace creation failed");
        }

        let mut created = Vec::new();
        for index in self.settings.vm_offset..count {
            let name = format!("{}{}", self.settings.vm_prefix, index);
            created.push(self.add_vm(index, namespace, &name, Some(node)).await);
            self.throttle.wait_for_idle(node).await;
        }

        if let Err(err) = self.reporter.log_snapshot().await {
            warn!(error = %err, "Status snapshot failed");
        }
        self.throttle.wait_for_idle(node).await;
        created
    }
}

/// The scale-out engine: runs one scenario, then the lifecycle phase.
pub struct ScaleOrchestrator {
    provisioner: Arc<Provisioner>,
    tracker: LifecycleTracker,
}

impl ScaleOrchestrator {
    /// Build an orchestrator, parsing the VM template up front.
    ///
    /// A template that cannot be read or parsed is fatal for the run.
    pub fn new(
        settings: Settings,
        gateway: Arc<dyn ClusterGateway>,
        actions: Arc<dyn ActionRunner>,
        probe: Arc<dyn CpuProbe>,
    ) -> Result<Self, TemplateError> {
        let template = template::load_template(&settings.vm_template)?;
        Ok(Self::with_template(settings, template, gateway, actions, probe))
    }

    /// Build an orchestrator from an already-parsed template.
    pub fn with_template(
        settings: Settings,
        template: Value,
        gateway: Arc<dyn ClusterGateway>,
        actions: Arc<dyn ActionRunner>,
        probe: Arc<dyn CpuProbe>,
    ) -> Self {
        let throttle = CapacityThrottle::new(probe, Duration::from_secs(settings.cpu_poll_secs));
        let reporter = StatusReporter::new(gateway.clone());
        Self {
            provisioner: Arc::new(Provisioner {
                gateway,
                actions,
                reporter,
                throttle,
                template,
                settings,
            }),
            tracker: LifecycleTracker::new(),
        }
    }

    /// Membership bookkeeping for the current run.
    pub fn tracker(&self) -> &LifecycleTracker {
        &self.tracker
    }

    /// Execute the configured scenario, then the lifecycle-action phase.
    pub async fn run(&mut self) -> Result<(), GatewayError> {
        match self.provisioner.settings.scenario {
            Scenario::SingleNode => self.run_single_node().await?,
            Scenario::MultiNode => self.run_multi_node().await?,
            Scenario::NamespaceSharded => self.run_namespace_sharded().await?,
        }
        self.run_lifecycle_phase().await;

        info!(
            created = self.tracker.len(MembershipSet::Created),
            stopped = self.tracker.len(MembershipSet::Stopped),
            started = self.tracker.len(MembershipSet::Started),
            "Scale campaign finished"
        );
        Ok(())
    }

    async fn run_single_node(&mut self) -> Result<(), GatewayError> {
        let p = self.provisioner.clone();

        let node = match &p.settings.node {
            Some(node) => node.clone(),
            // unpinned runs take the first ready compute node
            None => p
                .gateway
                .ready_nodes(&p.settings.node_selector)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| GatewayError::NoMatchingNode {
                    selector: p.settings.node_selector.clone(),
                })?,
        };

        info!(
            node = %node,
            vms = p.settings.vms_per_node,
            offset = p.settings.vm_offset,
            "Running single-node scale-up"
        );
        let namespace = p.namespace_name(1);
        let created = p
            .provision_node(&namespace, &node, p.settings.vms_per_node)
            .await;
        self.tracker.record_all(MembershipSet::Created, created);
        Ok(())
    }

    async fn run_multi_node(&mut self) -> Result<(), GatewayError> {
        let p = self.provisioner.clone();
        let nodes = p.gateway.ready_nodes(&p.settings.node_selector).await?;
        info!(
            nodes = nodes.len(),
            vms_per_node = p.settings.vms_per_node,
            "Running multi-node ramp-up"
        );

        let mut ns_counter = 0usize;
        for group in node_groups(&nodes, MAX_CONCURRENT_NODES) {
            let mut workers = Vec::new();
            for node in group {
                ns_counter += 1;
                let namespace = p.namespace_name(ns_counter);
                let provisioner = p.clone();
                workers.push(tokio::spawn(async move {
                    provisioner
                        .provision_node(&namespace, &node, provisioner.settings.vms_per_node)
                        .await
                }));
            }
            // barrier: every worker joins before the next group spawns
            for worker in workers {
                match worker.await {
                    Ok(created) => self.tracker.record_all(MembershipSet::Created, created),
                    Err(err) => error!(error = %err, "Node worker panicked"),
                }
            }
        }
        Ok(())
    }

    async fn run_namespace_sharded(&mut self) -> Result<(), GatewayError> {
        let p = self.provisioner.clone();
        let total = p.settings.total_vms;
        let ceiling = p.gateway.device_ceiling(&p.settings.node_selector).await? as usize;
        info!(
            total_vms = total,
            device_ceiling = ceiling,
            "Running namespace-sharded scale-out"
        );

        let mut ns_counter = 0usize;
        let mut namespace = String::new();
        for index in 0..total {
            if index % ceiling == 0 {
                ns_counter += 1;
                namespace = p.namespace_name(ns_counter);
                if let Err(err) = p.gateway.create_namespace(&namespace).await {
                    error!(namespace = %namespace, error = %err, "Namespace creation failed");
                }
            }
            let name = format!("{}{}", p.settings.vm_prefix, index);
            let identity = p.add_vm(index, &namespace, &name, None).await;
            self.tracker.record(MembershipSet::Created, identity);
        }
        Ok(())
    }

    /// Wait for enough running VMIs, then dispatch the configured actions.
    async fn run_lifecycle_phase(&mut self) {
        let Some(plan) = self.provisioner.settings.lifecycle.clone() else {
            return;
        };
        if plan.actions.is_empty() {
            return;
        }

        self.await_running(plan.vm_count).await;
        for action_name in &plan.actions {
            self.run_action(action_name, plan.vm_count).await;
        }
    }

    /// Poll until enough VMIs are running, bounded by the attempt budget.
    async fn await_running(&self, wanted: usize) {
        let p = &self.provisioner;
        let mut attempts = 0;
        loop {
            match p.reporter.snapshot().await {
                Ok(snapshot) if snapshot.running() >= wanted => return,
                Ok(snapshot) => {
                    debug!(
                        running = snapshot.running(),
                        wanted = wanted,
                        attempt = attempts,
                        "Waiting for running VMIs"
                    );
                }
                Err(err) => warn!(error = %err, "Status snapshot failed"),
            }
            if attempts >= p.settings.readiness_poll_attempts {
                warn!(wanted = wanted, "Proceeding without reaching the running target");
                return;
            }
            attempts += 1;
            sleep_secs(p.settings.readiness_poll_secs).await;
        }
    }

    async fn run_action(&mut self, action_name: &str, count: usize) {
        let p = self.provisioner.clone();

        let Some(action) = VmAction::parse(action_name) else {
            error!(action = %action_name, "Unsupported lifecycle action");
            return;
        };
        let targets = match self.tracker.select(action.source_set(), count) {
            Ok(targets) => targets,
            Err(err) => {
                error!(action = action.verb(), error = %err, "Lifecycle action rejected");
                return;
            }
        };

        info!(action = action.verb(), vms = targets.len(), "Dispatching lifecycle action");
        for identity in targets {
            if let Err(err) = p.actions.dispatch(action, &identity).await {
                warn!(action = action.verb(), vm = %identity, error = %err, "Action dispatch failed");
            }
            sleep_secs(p.settings.creation_pause_secs).await;
            self.tracker.record(action.destination_set(), identity);
        }
    }
}

async fn sleep_secs(secs: u64) {
    if secs > 0 {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }
}
