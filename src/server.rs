//! DNS server setup and lifecycle management.

use hickory_server::ServerFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::DnsConfig;
use crate::controller::Controller;
use crate::error::HostportError;
use crate::filter::Selector;
use crate::handler::HostportHandler;
use crate::index::LiveIndex;
use crate::resolver::Resolver;
use crate::source::InstanceSource;

/// Interval for emitting index metrics.
const METRICS_INTERVAL: Duration = Duration::from_secs(10);

/// Idle timeout for TCP connections.
const TCP_TIMEOUT: Duration = Duration::from_secs(30);

/// Periodically emit index metrics.
async fn metrics_loop(index: LiveIndex, mut stop: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(METRICS_INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                index.emit_metrics();
                debug!(
                    instances = index.instances_count(),
                    label_keys = index.label_keys_count(),
                    reverse_keys = index.reverse_keys_count(),
                    "emitted index metrics"
                );
            }
            _ = stop.changed() => {
                debug!("metrics loop shutting down");
                return;
            }
        }
    }
}

/// DNS server answering from a live index of cluster instances.
pub struct DnsServer {
    config: DnsConfig,
    index: LiveIndex,
}

impl DnsServer {
    /// Create a new DNS server with the given configuration.
    pub fn new(config: DnsConfig) -> Result<Self, HostportError> {
        config.validate()?;
        let index = LiveIndex::new(Selector::from_config(&config));
        Ok(Self { config, index })
    }

    /// The index served by this server.
    pub fn index(&self) -> &LiveIndex {
        &self.index
    }

    /// Run until `shutdown` completes.
    ///
    /// Queries are only served once the initial enumeration from `source`
    /// has been loaded.
    pub async fn run<F>(
        self,
        source: Arc<dyn InstanceSource>,
        shutdown: F,
    ) -> Result<(), HostportError>
    where
        F: Future<Output = ()>,
    {
        info!(
            listen_addr = %self.config.listen_addr,
            zones = ?self.config.zones,
            ttl = self.config.ttl,
            "Starting hostport-dns server"
        );

        let resolver = Arc::new(Resolver::from_config(
            &self.config,
            Arc::new(self.index.clone()),
        )?);

        let controller = Controller::new(source, self.index.clone());
        controller.start()?;

        tokio::pin!(shutdown);

        info!("Waiting for initial enumeration...");
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested before initial enumeration completed");
                return Self::stop(&controller).await;
            }
            result = controller.wait_synced() => {
                if let Err(e) = result {
                    controller.join().await?;
                    return Err(e);
                }
            }
        }
        info!(
            instances = self.index.instances_count(),
            label_keys = self.index.label_keys_count(),
            "Initial enumeration complete"
        );

        let mut server = ServerFuture::new(HostportHandler::new(resolver));

        let udp_socket = UdpSocket::bind(self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, "DNS UDP listening");
        server.register_socket(udp_socket);

        let tcp_listener = TcpListener::bind(self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, "DNS TCP listening");
        server.register_listener(tcp_listener, TCP_TIMEOUT);

        info!(zones = ?self.config.zones, "DNS server ready to serve queries");

        let (stop_tx, stop_rx) = watch::channel(false);
        let metrics_handle = tokio::spawn(metrics_loop(self.index.clone(), stop_rx));

        self.index.emit_metrics();

        tokio::select! {
            _ = &mut shutdown => {
                info!("DNS server shutdown requested");
            }
            result = server.block_until_done() => {
                if let Err(e) = result {
                    error!("DNS server error: {}", e);
                }
            }
        }

        let _ = stop_tx.send(true);
        let _ = metrics_handle.await;

        info!("Waiting for reconciler to stop...");
        let result = Self::stop(&controller).await;

        info!("DNS server stopped");
        result
    }

    async fn stop(controller: &Controller) -> Result<(), HostportError> {
        if let Err(e) = controller.shutdown() {
            warn!("Reconciler shutdown: {}", e);
        }
        controller.join().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn config() -> DnsConfig {
        DnsConfig::new(
            "127.0.0.1:0".parse().unwrap(),
            vec!["cluster.local".to_string()],
        )
    }

    #[test]
    fn test_server_creation() {
        let server = DnsServer::new(config()).unwrap();
        assert!(!server.index().synced());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = config();
        config.ttl = 7200;
        assert!(matches!(
            DnsServer::new(config),
            Err(HostportError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_before_serving() {
        let server = DnsServer::new(config()).unwrap();
        let (source, _feed) = MemorySource::new(Vec::new());

        let result = server
            .run(Arc::new(source), std::future::ready(()))
            .await;
        assert!(result.is_ok());
    }
}
