//! Scale and endurance testing engine for cluster-scheduled VMs
//!
//! This crate provides the core functionality for:
//! - Scale-out orchestration across three scenarios
//! - VM template binding with per-campaign constraints
//! - Capacity throttling on live node telemetry
//! - Lifecycle bookkeeping and action dispatch
//! - VMI status aggregation

pub mod actions;
pub mod gateway;
pub mod orchestrator;
pub mod reporter;
pub mod settings;
pub mod template;
pub mod throttle;
pub mod tracker;

pub use actions::{ActionRunner, VirtctlRunner, VmAction};
pub use gateway::{ClusterGateway, GatewayError, KubeGateway, VmiRecord};
pub use orchestrator::ScaleOrchestrator;
pub use reporter::{StatusReporter, StatusSnapshot, VMI_PHASES};
pub use settings::{Scenario, Settings, SettingsError};
pub use template::TemplateError;
pub use throttle::{CapacityThrottle, CpuProbe, SshTopProbe};
pub use tracker::{LifecycleTracker, MembershipSet, VmIdentity};
