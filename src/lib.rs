//! Hostport DNS - answers DNS queries from a live index of Kubernetes pods.
//!
//! Pods carrying a configured label are published under
//! `<labelValue>.<namespace>.<zone>` with the address of the node they run
//! on. The matching reverse names under `in-addr.arpa.` and `ip6.arpa.`
//! resolve back to those names.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                         hostport-dns                          │
//! │                                                               │
//! │  ┌────────────────┐   ┌────────────┐   ┌──────────────────┐  │
//! │  │ InstanceSource │──▶│ Reconciler │──▶│    LiveIndex     │  │
//! │  │ (list + watch) │   │            │   │ label │ reverse  │  │
//! │  └────────────────┘   └────────────┘   └────────┬─────────┘  │
//! │          ▲                   ▲                  │             │
//! │          │             ┌─────┴──────┐           ▼             │
//! │   Kubernetes API       │ Controller │   ┌──────────────────┐  │
//! │                        └────────────┘   │ Resolver/Handler │◀─── UDP/TCP
//! │                                         └──────────────────┘  │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Publishing rules
//!
//! A pod is published when it is not being deleted, has a host address,
//! does not report `Ready=False`, carries the label (with the required
//! value, if any) and, in strict mode, declares a host port. Only running
//! pods contribute A/AAAA records.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use hostport_dns::{DnsConfig, DnsServer, KubeSource, SourceConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = DnsConfig::new(
//!         "[::]:5353".parse().unwrap(),
//!         vec!["cluster.local".to_string(), "in-addr.arpa".to_string()],
//!     );
//!
//!     let source = KubeSource::connect(&config, &SourceConfig::default())
//!         .await
//!         .unwrap();
//!
//!     let server = DnsServer::new(config).unwrap();
//!     server
//!         .run(Arc::new(source), async { let _ = tokio::signal::ctrl_c().await; })
//!         .await
//!         .unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod controller;
pub mod error;
pub mod filter;
pub mod handler;
pub mod index;
pub mod instance;
pub mod metrics;
pub mod reconcile;
pub mod resolver;
pub mod server;
pub mod source;
pub mod telemetry;

pub use crate::config::{Config, DnsConfig, SourceConfig, TelemetryConfig};
pub use crate::controller::Controller;
pub use crate::error::HostportError;
pub use crate::filter::Selector;
pub use crate::handler::HostportHandler;
pub use crate::index::{InstanceIndex, LiveIndex};
pub use crate::instance::Instance;
pub use crate::resolver::{Fallthrough, Resolution, Resolver};
pub use crate::server::DnsServer;
pub use crate::source::{InstanceSource, KubeSource, MemorySource};
