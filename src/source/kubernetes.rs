//! Kubernetes pod source.
//!
//! Lists pods carrying the configured label key, then watches from the listed
//! resource version. The watch is re-established with backoff when it drops,
//! and pods are listed again when the API server reports the resource
//! version as expired (HTTP 410).

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, WatchEvent, WatchParams};
use kube::config::KubeConfigOptions;
use kube::Client;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{InstanceSource, Listing, SourceEvent};
use crate::config::{DnsConfig, SourceConfig};
use crate::error::HostportError;
use crate::instance::{Condition, ConditionStatus, ContainerPort, Instance, Phase};
use crate::metrics::{self, ReconnectReason};

/// Server-side timeout of a single watch request, in seconds.
const WATCH_TIMEOUT_SECS: u32 = 290;

/// First reconnect delay after a failure, in seconds.
const INITIAL_BACKOFF_SECS: u64 = 1;

/// Upper bound for the reconnect backoff, in seconds.
const MAX_BACKOFF_SECS: u64 = 30;

/// Buffered events between the watch task and the reconciler.
const EVENT_BUFFER: usize = 256;

/// HTTP status the API server uses for an expired resource version.
const GONE: u16 = 410;

impl From<&Pod> for Instance {
    fn from(pod: &Pod) -> Self {
        let meta = &pod.metadata;
        let status = pod.status.as_ref();

        let conditions = status
            .and_then(|s| s.conditions.as_ref())
            .map(|conditions| {
                conditions
                    .iter()
                    .map(|c| Condition {
                        kind: c.type_.clone(),
                        status: ConditionStatus::from_api(&c.status),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let ports = pod
            .spec
            .as_ref()
            .map(|spec| {
                spec.containers
                    .iter()
                    .flat_map(|c| c.ports.iter().flatten())
                    .map(|p| ContainerPort {
                        container_port: u16::try_from(p.container_port).unwrap_or(0),
                        host_port: p.host_port.and_then(|h| u16::try_from(h).ok()),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Instance {
            namespace: meta.namespace.clone().unwrap_or_default(),
            name: meta.name.clone().unwrap_or_default(),
            labels: meta.labels.clone().unwrap_or_default(),
            host_ip: status.and_then(|s| s.host_ip.clone()).unwrap_or_default(),
            phase: status
                .and_then(|s| s.phase.as_deref())
                .map(Phase::from_api)
                .unwrap_or_default(),
            conditions,
            deleting: meta.deletion_timestamp.is_some(),
            ports,
        }
    }
}

/// Reconnect delay doubling on each consecutive failure.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Backoff {
    secs: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            secs: INITIAL_BACKOFF_SECS,
        }
    }
}

impl Backoff {
    /// Delay before the next attempt; doubles the following one.
    fn next_delay(&mut self) -> Duration {
        let delay = Duration::from_secs(self.secs);
        self.secs = (self.secs * 2).min(MAX_BACKOFF_SECS);
        delay
    }

    /// Start over after an event was delivered.
    fn reset(&mut self) {
        self.secs = INITIAL_BACKOFF_SECS;
    }
}

/// Pods from a Kubernetes API server.
#[derive(Clone)]
pub struct KubeSource {
    api: Api<Pod>,
    label_key: String,
}

impl KubeSource {
    /// Create a source over an existing client.
    ///
    /// An empty `namespace` watches all namespaces.
    pub fn new(client: Client, namespace: &str, label_key: impl Into<String>) -> Self {
        let api = if namespace.is_empty() {
            Api::all(client)
        } else {
            Api::namespaced(client, namespace)
        };
        Self {
            api,
            label_key: label_key.into(),
        }
    }

    /// Connect using the in-cluster or local kubeconfig.
    pub async fn connect(dns: &DnsConfig, source: &SourceConfig) -> Result<Self, HostportError> {
        let client = match &source.kubeconfig_context {
            Some(context) => {
                let options = KubeConfigOptions {
                    context: Some(context.clone()),
                    ..Default::default()
                };
                let config = kube::Config::from_kubeconfig(&options)
                    .await
                    .map_err(|e| HostportError::Source(format!("kubeconfig: {e}")))?;
                Client::try_from(config)?
            }
            None => Client::try_default().await?,
        };

        info!(
            namespace = %dns.namespace,
            label_key = %dns.label_key,
            "connected to Kubernetes API"
        );
        Ok(Self::new(client, &dns.namespace, dns.label_key.clone()))
    }

    async fn list_pods(api: &Api<Pod>, label_key: &str) -> Result<Listing, HostportError> {
        let pods = api.list(&ListParams::default().labels(label_key)).await?;
        let version = pods.metadata.resource_version.clone();
        let instances: Vec<Instance> = pods.items.iter().map(Instance::from).collect();
        debug!(count = instances.len(), version = ?version, "listed pods");
        Ok(Listing { instances, version })
    }

    /// Drive watch requests until the receiving side goes away.
    async fn pump(
        api: Api<Pod>,
        label_key: String,
        mut version: String,
        tx: mpsc::Sender<Result<SourceEvent, HostportError>>,
    ) {
        let mut backoff = Backoff::default();

        loop {
            let params = WatchParams::default()
                .labels(&label_key)
                .timeout(WATCH_TIMEOUT_SECS);

            let mut stream = match api.watch(&params, &version).await {
                Ok(s) => s.boxed(),
                Err(e) => {
                    warn!("Failed to watch pods: {}", e);
                    metrics::record_source_reconnect(ReconnectReason::Error);
                    if tx.send(Err(e.into())).await.is_err() {
                        return;
                    }
                    sleep(backoff.next_delay()).await;
                    continue;
                }
            };

            let mut failure: Option<HostportError> = None;
            while let Some(result) = stream.next().await {
                let event = match result {
                    Ok(WatchEvent::Added(pod)) => {
                        Self::advance(&mut version, &pod);
                        SourceEvent::Added(Instance::from(&pod))
                    }
                    Ok(WatchEvent::Modified(pod)) => {
                        Self::advance(&mut version, &pod);
                        SourceEvent::Modified(Instance::from(&pod))
                    }
                    Ok(WatchEvent::Deleted(pod)) => {
                        Self::advance(&mut version, &pod);
                        SourceEvent::Deleted(Instance::from(&pod))
                    }
                    Ok(WatchEvent::Bookmark(bookmark)) => {
                        version = bookmark.metadata.resource_version;
                        continue;
                    }
                    Ok(WatchEvent::Error(e)) if e.code == GONE => {
                        warn!(version = %version, "resource version expired, listing pods again");
                        metrics::record_source_reconnect(ReconnectReason::Expired);
                        match Self::list_pods(&api, &label_key).await {
                            Ok(listing) => {
                                version = listing.version.clone().unwrap_or_default();
                                SourceEvent::Restarted(listing)
                            }
                            Err(e) => {
                                failure = Some(e);
                                break;
                            }
                        }
                    }
                    Ok(WatchEvent::Error(e)) => {
                        warn!(code = e.code, message = %e.message, "watch error event");
                        metrics::record_source_reconnect(ReconnectReason::Error);
                        failure = Some(HostportError::Source(e.message));
                        break;
                    }
                    Err(e) => {
                        warn!("Pod watch stream error: {}", e);
                        metrics::record_source_reconnect(ReconnectReason::Error);
                        failure = Some(e.into());
                        break;
                    }
                };

                if tx.send(Ok(event)).await.is_err() {
                    debug!("pod watch receiver dropped");
                    return;
                }
                backoff.reset();
            }

            match failure {
                Some(e) => {
                    if tx.send(Err(e)).await.is_err() {
                        return;
                    }
                    sleep(backoff.next_delay()).await;
                }
                None => {
                    debug!(version = %version, "pod watch ended, reconnecting");
                    metrics::record_source_reconnect(ReconnectReason::StreamEnded);
                }
            }
        }
    }

    fn advance(version: &mut String, pod: &Pod) {
        if let Some(v) = &pod.metadata.resource_version {
            version.clone_from(v);
        }
    }
}

#[async_trait]
impl InstanceSource for KubeSource {
    async fn list(&self) -> Result<Listing, HostportError> {
        Self::list_pods(&self.api, &self.label_key).await
    }

    fn watch(
        &self,
        version: Option<String>,
    ) -> BoxStream<'static, Result<SourceEvent, HostportError>> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(Self::pump(
            self.api.clone(),
            self.label_key.clone(),
            version.unwrap_or_default(),
            tx,
        ));

        futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        Container, ContainerPort as PodPort, PodCondition, PodSpec, PodStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn make_pod() -> Pod {
        Pod {
            metadata: ObjectMeta {
                namespace: Some("ns1".to_string()),
                name: Some("svc1-0".to_string()),
                labels: Some([("app".to_string(), "svc1".to_string())].into()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![
                    Container {
                        name: "main".to_string(),
                        ports: Some(vec![PodPort {
                            container_port: 8080,
                            host_port: Some(18080),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    },
                    Container {
                        name: "sidecar".to_string(),
                        ports: None,
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }),
            status: Some(PodStatus {
                host_ip: Some("10.0.0.5".to_string()),
                phase: Some("Running".to_string()),
                conditions: Some(vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: "True".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_pod_conversion() {
        let instance = Instance::from(&make_pod());

        assert_eq!(instance.namespace, "ns1");
        assert_eq!(instance.name, "svc1-0");
        assert_eq!(instance.label("app"), Some("svc1"));
        assert_eq!(instance.host_ip, "10.0.0.5");
        assert_eq!(instance.phase, Phase::Running);
        assert!(!instance.deleting);
        assert_eq!(
            instance.conditions,
            vec![Condition {
                kind: "Ready".to_string(),
                status: ConditionStatus::True,
            }]
        );
        assert_eq!(
            instance.ports,
            vec![ContainerPort {
                container_port: 8080,
                host_port: Some(18080),
            }]
        );
    }

    #[test]
    fn test_backoff_doubles_to_cap() {
        let mut backoff = Backoff::default();
        let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn test_backoff_reset_after_delivery() {
        let mut backoff = Backoff::default();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_unscheduled_pod_conversion() {
        let mut pod = make_pod();
        pod.status = None;
        pod.spec = None;

        let instance = Instance::from(&pod);
        assert!(instance.host_ip.is_empty());
        assert_eq!(instance.phase, Phase::Unknown);
        assert!(instance.conditions.is_empty());
        assert!(instance.ports.is_empty());
    }
}
