//! Eligibility rules deciding which instances are published in DNS.

use crate::config::DnsConfig;
use crate::instance::{Instance, READY_CONDITION};

/// Label selection and publishing rules.
///
/// The selector is the only authority on index membership: the index asks it
/// for keys when instances change and the resolver never re-evaluates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    label_key: String,
    label_value: String,
    strict_host_port: bool,
}

impl Selector {
    /// Create a selector. An empty `label_value` accepts any value.
    pub fn new(
        label_key: impl Into<String>,
        label_value: impl Into<String>,
        strict_host_port: bool,
    ) -> Self {
        Self {
            label_key: label_key.into(),
            label_value: label_value.into(),
            strict_host_port,
        }
    }

    /// Build the selector described by a DNS configuration.
    pub fn from_config(config: &DnsConfig) -> Self {
        Self::new(
            config.label_key.clone(),
            config.label_value.clone(),
            config.strict_host_port,
        )
    }

    /// The label key instances must carry.
    pub fn label_key(&self) -> &str {
        &self.label_key
    }

    /// Decide whether an instance is currently published.
    ///
    /// Checks run in order and stop at the first failure.
    pub fn eligible(&self, instance: Option<&Instance>) -> bool {
        let Some(instance) = instance else {
            return false;
        };

        if instance.deleting || instance.host_ip.is_empty() {
            return false;
        }

        // A missing Ready condition is not a rejection.
        if instance.reports_not(READY_CONDITION) {
            return false;
        }

        let Some(value) = instance.label(&self.label_key) else {
            return false;
        };

        if !self.label_value.is_empty() && value != self.label_value {
            return false;
        }

        if !self.strict_host_port {
            return true;
        }

        instance.ports.iter().any(|p| p.exposes_host_port())
    }

    /// `<labelValue>.<namespace>` for an instance carrying the selected label.
    ///
    /// Returns `None` when the label is missing or its value does not match a
    /// configured required value. Does not apply the other eligibility checks.
    pub fn label_name(&self, instance: &Instance) -> Option<String> {
        let value = instance.label(&self.label_key)?;
        if !self.label_value.is_empty() && value != self.label_value {
            return None;
        }
        Some(format!("{}.{}", value, instance.namespace))
    }

    /// Index keys of an instance: `(label key, reverse key)`.
    ///
    /// Both are `None` for an ineligible instance.
    pub fn keys(&self, instance: &Instance) -> (Option<String>, Option<String>) {
        if !self.eligible(Some(instance)) {
            return (None, None);
        }
        (self.label_name(instance), Some(instance.host_ip.clone()))
    }
}
