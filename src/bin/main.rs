//! hostport-dns binary entry point.

use clap::Parser;
use hostport_dns::{telemetry, Config, DnsServer, HostportError, KubeSource};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// DNS server answering from a live index of Kubernetes pods.
#[derive(Parser, Debug)]
#[command(name = "hostport-dns")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(short, long, default_value = "hostport-dns.toml")]
    config: PathBuf,
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    let _ = tokio::signal::ctrl_c().await;

    info!("Shutdown signal received");
}

async fn run(config: Config) -> Result<(), HostportError> {
    let source = KubeSource::connect(&config.dns, &config.source).await?;
    DnsServer::new(config.dns)?
        .run(Arc::new(source), shutdown_signal())
        .await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config: Config = config::Config::builder()
        .add_source(config::File::from(args.config.clone()))
        .add_source(
            config::Environment::with_prefix("HOSTPORT_DNS")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("dns.zones")
                .with_list_parse_key("dns.fallthrough"),
        )
        .build()?
        .try_deserialize()?;
    config.dns.validate()?;

    telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    info!(
        config_file = %args.config.display(),
        listen_addr = %config.dns.listen_addr,
        zones = ?config.dns.zones,
        namespace = %config.dns.namespace,
        label_key = %config.dns.label_key,
        "Starting hostport-dns"
    );

    let result = run(config).await;

    telemetry::shutdown();

    if let Err(e) = result {
        error!("hostport-dns error: {}", e);
        return Err(e.into());
    }

    info!("hostport-dns shutdown complete");
    Ok(())
}
