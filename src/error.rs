//! Error types for hostport-dns.

use thiserror::Error;

/// Errors that can occur in the DNS server.
#[derive(Debug, Error)]
pub enum HostportError {
    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Kubernetes client error
    #[error("Kubernetes client error: {0}")]
    Kube(#[from] kube::Error),

    /// DNS protocol error
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// An index key refers to an instance the index does not hold.
    #[error("index inconsistency: key {key:?} refers to missing instance {instance}")]
    IndexInconsistency {
        /// Key that was looked up.
        key: String,
        /// Instance the key pointed at.
        instance: String,
    },

    /// The index could not serve a lookup.
    #[error("index lookup failed: {0}")]
    Lookup(String),

    /// The instance source failed or ended unexpectedly.
    #[error("instance source error: {0}")]
    Source(String),

    /// Reconciliation was already started.
    #[error("reconciliation already started")]
    AlreadyStarted,

    /// Shutdown was requested more than once.
    #[error("shutdown already in progress")]
    ShutdownConflict,
}
