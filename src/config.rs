//! Configuration types for hostport-dns.

use hickory_proto::rr::{LowerName, Name};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::error::HostportError;

/// Largest accepted record TTL in seconds.
pub const MAX_TTL: u32 = 3600;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// DNS server configuration.
    pub dns: DnsConfig,

    /// Cluster source configuration.
    #[serde(default)]
    pub source: SourceConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// DNS server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DnsConfig {
    /// Address for DNS server to listen on (UDP and TCP).
    pub listen_addr: SocketAddr,

    /// Zones this server is authoritative for. The first zone is used as
    /// SOA owner and as suffix of PTR targets.
    pub zones: Vec<String>,

    /// TTL for DNS records in seconds, at most [`MAX_TTL`].
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// Namespace to watch; empty means all namespaces.
    #[serde(default)]
    pub namespace: String,

    /// Label key instances must carry to be published.
    #[serde(default = "default_label_key")]
    pub label_key: String,

    /// Required label value; empty accepts any value.
    #[serde(default)]
    pub label_value: String,

    /// Only publish instances declaring at least one host port.
    #[serde(default)]
    pub strict_host_port: bool,

    /// Zones for which negative answers are handed to the next handler.
    /// An empty list means every name; absent disables fallthrough.
    #[serde(default)]
    pub fallthrough: Option<Vec<String>>,
}

/// Cluster source configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Kubeconfig context to use instead of the in-cluster or current one.
    #[serde(default)]
    pub kubeconfig_context: Option<String>,
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "hostport_dns=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,

    /// OpenTelemetry configuration.
    #[serde(default)]
    pub opentelemetry: Option<OpenTelemetryConfig>,
}

/// OpenTelemetry exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenTelemetryConfig {
    /// OTLP endpoint (e.g., "http://localhost:4317").
    pub endpoint: String,

    /// Service name for traces.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
            opentelemetry: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "hostport-dns".to_string()
}

fn default_ttl() -> u32 {
    5
}

fn default_label_key() -> String {
    "shturval.link/serviceName".to_string()
}

impl DnsConfig {
    /// Configuration for the given zones with every other setting at its default.
    pub fn new(listen_addr: SocketAddr, zones: Vec<String>) -> Self {
        Self {
            listen_addr,
            zones,
            ttl: default_ttl(),
            namespace: String::new(),
            label_key: default_label_key(),
            label_value: String::new(),
            strict_host_port: false,
            fallthrough: None,
        }
    }

    /// Check settings that serde cannot.
    pub fn validate(&self) -> Result<(), HostportError> {
        if self.ttl > MAX_TTL {
            return Err(HostportError::Config(format!(
                "ttl must be in range [0, {MAX_TTL}]: {}",
                self.ttl
            )));
        }
        if self.label_key.is_empty() {
            return Err(HostportError::Config("label_key must not be empty".into()));
        }
        self.zone_names()?;
        if let Some(zones) = &self.fallthrough {
            parse_zones(zones)?;
        }
        Ok(())
    }

    /// Configured zones as fully qualified, lower-cased names.
    pub fn zone_names(&self) -> Result<Vec<LowerName>, HostportError> {
        if self.zones.is_empty() {
            return Err(HostportError::Config(
                "at least one zone is required".into(),
            ));
        }
        parse_zones(&self.zones)
    }
}

/// Parse zone strings into fully qualified, lower-cased names.
pub fn parse_zones(zones: &[String]) -> Result<Vec<LowerName>, HostportError> {
    zones
        .iter()
        .map(|zone| {
            let mut name = Name::from_ascii(zone)
                .map_err(|e| HostportError::Config(format!("invalid zone {zone:?}: {e}")))?;
            name.set_fqdn(true);
            Ok(LowerName::from(name))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DnsConfig {
        DnsConfig::new(
            "127.0.0.1:5353".parse().unwrap(),
            vec!["cluster.local".to_string()],
        )
    }

    #[test]
    fn test_defaults() {
        let config = config();
        assert_eq!(config.ttl, 5);
        assert_eq!(config.label_key, "shturval.link/serviceName");
        assert!(config.namespace.is_empty());
        assert!(config.label_value.is_empty());
        assert!(!config.strict_host_port);
        assert!(config.fallthrough.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ttl_range() {
        let mut config = config();
        config.ttl = 0;
        assert!(config.validate().is_ok());
        config.ttl = 3600;
        assert!(config.validate().is_ok());
        config.ttl = 3601;
        assert!(matches!(config.validate(), Err(HostportError::Config(_))));
    }

    #[test]
    fn test_empty_zones_rejected() {
        let mut config = config();
        config.zones.clear();
        assert!(matches!(config.validate(), Err(HostportError::Config(_))));
    }

    #[test]
    fn test_zone_names_are_fqdn_and_lowercase() {
        let mut config = config();
        config.zones = vec!["Cluster.Local".to_string(), ".".to_string()];
        let zones = config.zone_names().unwrap();
        assert_eq!(zones[0].to_string(), "cluster.local.");
        assert_eq!(zones[1].to_string(), ".");
    }

    #[test]
    fn test_unknown_directive_rejected() {
        let raw = r#"
            listen_addr = "127.0.0.1:53"
            zones = ["cluster.local"]
            bogus = 1
        "#;
        let parsed = ::config::Config::builder()
            .add_source(::config::File::from_str(raw, ::config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize::<DnsConfig>();
        assert!(parsed.is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let raw = r#"
            listen_addr = "127.0.0.1:53"
            zones = ["cluster.local"]
            ttl = 15
            fallthrough = ["in-addr.arpa"]
        "#;
        let config: DnsConfig = ::config::Config::builder()
            .add_source(::config::File::from_str(raw, ::config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.ttl, 15);
        assert_eq!(config.fallthrough, Some(vec!["in-addr.arpa".to_string()]));
        assert_eq!(config.label_key, "shturval.link/serviceName");
    }
}
