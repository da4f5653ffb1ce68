//! Workload instance records as seen by the DNS index.
//!
//! An [`Instance`] is a read-only snapshot of a scheduled pod: its identity,
//! labels, host address and lifecycle state. Instances are produced by an
//! [`InstanceSource`](crate::source::InstanceSource) and never mutated here.

use std::collections::BTreeMap;
use std::fmt;

/// Condition kind reporting whether a pod is ready to serve.
pub const READY_CONDITION: &str = "Ready";

/// Identity of an instance within the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId {
    /// Namespace the instance lives in.
    pub namespace: String,
    /// Name of the instance, unique within its namespace.
    pub name: String,
}

impl InstanceId {
    /// Create an identity from namespace and name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Lifecycle phase of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Accepted but not all containers started.
    Pending,
    /// Bound to a host with at least one container running.
    Running,
    /// All containers terminated successfully.
    Succeeded,
    /// All containers terminated, at least one in failure.
    Failed,
    /// State could not be obtained.
    #[default]
    Unknown,
}

impl Phase {
    /// Parse the phase string reported by the cluster API.
    pub fn from_api(phase: &str) -> Self {
        match phase {
            "Pending" => Phase::Pending,
            "Running" => Phase::Running,
            "Succeeded" => Phase::Succeeded,
            "Failed" => Phase::Failed,
            _ => Phase::Unknown,
        }
    }
}

/// Tri-state status of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition holds.
    True,
    /// Condition does not hold.
    False,
    /// Status is not known.
    Unknown,
}

impl ConditionStatus {
    /// Parse the status string reported by the cluster API.
    pub fn from_api(status: &str) -> Self {
        match status {
            "True" => ConditionStatus::True,
            "False" => ConditionStatus::False,
            _ => ConditionStatus::Unknown,
        }
    }
}

/// A single status condition, e.g. `Ready=True`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    /// Condition kind, e.g. `"Ready"`.
    pub kind: String,
    /// Current status.
    pub status: ConditionStatus,
}

/// A declared container port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContainerPort {
    /// Port inside the container.
    pub container_port: u16,
    /// Port bound on the host, if any.
    pub host_port: Option<u16>,
}

impl ContainerPort {
    /// True when the port is bound on the host.
    pub fn exposes_host_port(&self) -> bool {
        matches!(self.host_port, Some(port) if port != 0)
    }
}

/// A workload instance record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Instance {
    /// Namespace the instance lives in.
    pub namespace: String,
    /// Name of the instance.
    pub name: String,
    /// Label key/value pairs.
    pub labels: BTreeMap<String, String>,
    /// Address of the host running the instance, IPv4 or IPv6 text form.
    /// Empty when the instance is not yet scheduled.
    pub host_ip: String,
    /// Lifecycle phase.
    pub phase: Phase,
    /// Status conditions.
    pub conditions: Vec<Condition>,
    /// Set once deletion of the instance has been requested.
    pub deleting: bool,
    /// Ports declared by all containers of the instance.
    pub ports: Vec<ContainerPort>,
}

impl Instance {
    /// Identity of this instance.
    pub fn id(&self) -> InstanceId {
        InstanceId::new(&self.namespace, &self.name)
    }

    /// Value of the given label, if present.
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// True if a condition of the given kind reports anything but `True`.
    pub fn reports_not(&self, kind: &str) -> bool {
        self.conditions
            .iter()
            .any(|c| c.kind == kind && c.status != ConditionStatus::True)
    }

    /// True when the host address is in IPv6 text form.
    pub fn is_ipv6_host(&self) -> bool {
        self.host_ip.contains(':')
    }
}
