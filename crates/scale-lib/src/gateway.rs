//! Cluster API gateway
//!
//! Wraps the Kubernetes client behind a small capability trait so the
//! orchestrator can be driven against a mock cluster in tests. The live
//! implementation reaches VM and VMI resources through the dynamic API.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Node};
use kube::api::{Api, DynamicObject, ListParams, ObjectMeta, PostParams};
use kube::config::KubeConfigOptions;
use kube::core::{ApiResource, GroupVersionKind};
use kube::{Client, Config};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

const KUBEVIRT_GROUP: &str = "kubevirt.io";
const KUBEVIRT_VERSION: &str = "v1alpha3";

/// Device-plugin capacity key that bounds schedulable VMs per node.
const KVM_DEVICE_CAPACITY: &str = "devices.kubevirt.io/kvm";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("not logged in to cluster: {0}")]
    Auth(String),

    #[error("cluster API request failed: {0}")]
    Api(#[from] kube::Error),

    #[error("VM manifest is not a valid object: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("no ready node matches selector {selector}")]
    NoMatchingNode { selector: String },

    #[error("node {node} reports no kvm device capacity")]
    MissingCapacity { node: String },

    #[error("unusable kvm device capacity on node {node}: {value}")]
    BadCapacity { node: String, value: String },
}

/// A VMI as seen by the status reporter.
#[derive(Debug, Clone)]
pub struct VmiRecord {
    pub name: String,
    pub namespace: String,
    pub phase: String,
}

/// Capabilities the orchestrator needs from the cluster.
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    /// Names of ready nodes matching the label selector, in list order.
    async fn ready_nodes(&self, selector: &str) -> Result<Vec<String>, GatewayError>;

    /// Device ceiling of the first node matching the selector.
    async fn device_ceiling(&self, selector: &str) -> Result<u32, GatewayError>;

    /// Create a namespace; an already-existing namespace is not an error.
    async fn create_namespace(&self, name: &str) -> Result<(), GatewayError>;

    /// Submit a bound VM manifest into a namespace.
    async fn create_vm(&self, manifest: &Value, namespace: &str) -> Result<(), GatewayError>;

    /// All VMIs on the cluster with their current phase.
    async fn list_vmis(&self) -> Result<Vec<VmiRecord>, GatewayError>;
}

/// Live gateway backed by the Kubernetes dynamic client.
#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
    vm_resource: ApiResource,
    vmi_resource: ApiResource,
}

impl KubeGateway {
    /// Connect using kubeconfig, falling back to the in-cluster environment.
    ///
    /// Both failing means the process has no usable cluster credentials;
    /// callers treat this as fatal.
    pub async fn connect() -> Result<Self, GatewayError> {
        let config = match Config::from_kubeconfig(&KubeConfigOptions::default()).await {
            Ok(config) => config,
            Err(kubeconfig_err) => match Config::incluster() {
                Ok(config) => config,
                Err(in_cluster_err) => {
                    return Err(GatewayError::Auth(format!(
                        "kubeconfig: {kubeconfig_err}, in-cluster: {in_cluster_err}"
                    )));
                }
            },
        };
        let client =
            Client::try_from(config).map_err(|err| GatewayError::Auth(err.to_string()))?;

        let vm_resource = ApiResource::from_gvk(&GroupVersionKind::gvk(
            KUBEVIRT_GROUP,
            KUBEVIRT_VERSION,
            "VirtualMachine",
        ));
        let vmi_resource = ApiResource::from_gvk(&GroupVersionKind::gvk(
            KUBEVIRT_GROUP,
            KUBEVIRT_VERSION,
            "VirtualMachineInstance",
        ));

        Ok(Self {
            client,
            vm_resource,
            vmi_resource,
        })
    }
}

#[async_trait]
impl ClusterGateway for KubeGateway {
    async fn ready_nodes(&self, selector: &str) -> Result<Vec<String>, GatewayError> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes
            .list(&ListParams::default().labels(selector))
            .await?;

        let mut ready = Vec::new();
        for node in list.items {
            let Some(name) = node.metadata.name else {
                continue;
            };
            let is_ready = node
                .status
                .as_ref()
                .and_then(|status| status.conditions.as_ref())
                .map(|conditions| {
                    conditions.iter().any(|c| {
                        c.reason.as_deref() == Some("KubeletReady") && c.status == "True"
                    })
                })
                .unwrap_or(false);
            if is_ready {
                ready.push(name);
            }
        }
        Ok(ready)
    }

    async fn device_ceiling(&self, selector: &str) -> Result<u32, GatewayError> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes
            .list(&ListParams::default().labels(selector))
            .await?;

        let node = list
            .items
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::NoMatchingNode {
                selector: selector.to_string(),
            })?;
        let name = node.metadata.name.unwrap_or_default();

        let capacity = node
            .status
            .as_ref()
            .and_then(|status| status.capacity.as_ref())
            .and_then(|capacity| capacity.get(KVM_DEVICE_CAPACITY))
            .ok_or_else(|| GatewayError::MissingCapacity { node: name.clone() })?;

        let ceiling = capacity.0.parse::<u32>().map_err(|_| GatewayError::BadCapacity {
            node: name.clone(),
            value: capacity.0.clone(),
        })?;
        if ceiling == 0 {
            return Err(GatewayError::BadCapacity {
                node: name,
                value: capacity.0.clone(),
            });
        }
        Ok(ceiling)
    }

    async fn create_namespace(&self, name: &str) -> Result<(), GatewayError> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        match namespaces.create(&PostParams::default(), &namespace).await {
            Ok(_) => {
                info!(namespace = %name, "Namespace created");
                Ok(())
            }
            // namespace left over from an earlier run
            Err(kube::Error::Api(err)) if err.code == 409 => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn create_vm(&self, manifest: &Value, namespace: &str) -> Result<(), GatewayError> {
        let vms: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &self.vm_resource);
        let object: DynamicObject = serde_json::from_value(manifest.clone())?;
        vms.create(&PostParams::default(), &object).await?;
        Ok(())
    }

    async fn list_vmis(&self) -> Result<Vec<VmiRecord>, GatewayError> {
        let vmis: Api<DynamicObject> = Api::all_with(self.client.clone(), &self.vmi_resource);
        let list = vmis.list(&ListParams::default()).await?;

        Ok(list
            .items
            .into_iter()
            .map(|object| VmiRecord {
                name: object.metadata.name.clone().unwrap_or_default(),
                namespace: object.metadata.namespace.clone().unwrap_or_default(),
                phase: object
                    .data
                    .pointer("/status/phase")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown")
                    .to_string(),
            })
            .collect())
    }
}
