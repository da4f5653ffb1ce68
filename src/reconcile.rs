//! Reconciliation of the index against an instance source.

use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::HostportError;
use crate::index::LiveIndex;
use crate::metrics::{self, ReconcileEventType};
use crate::source::{InstanceSource, SourceEvent};

/// Keeps a [`LiveIndex`] in step with an [`InstanceSource`].
///
/// Loads one full enumeration, marks the index synced, then applies change
/// events strictly one after another. This is the only writer of the index.
pub struct Reconciler {
    source: Arc<dyn InstanceSource>,
    index: LiveIndex,
}

impl Reconciler {
    /// Create a reconciler writing into `index`.
    pub fn new(source: Arc<dyn InstanceSource>, index: LiveIndex) -> Self {
        Self { source, index }
    }

    /// Run until `shutdown` fires (or its sender is dropped).
    ///
    /// Fails if the initial enumeration fails or the change stream ends.
    /// Errors reported inside the stream are logged and skipped.
    pub async fn run(self, mut shutdown: oneshot::Receiver<()>) -> Result<(), HostportError> {
        info!("Starting initial enumeration");

        let listing = tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("Shutdown requested before initial enumeration completed");
                return Ok(());
            }

            result = self.source.list() => result?,
        };

        let version = listing.version.clone();
        let count = listing.instances.len();
        self.index.replace_all(listing.instances);
        self.index.mark_synced();
        metrics::record_reconcile_event(ReconcileEventType::Listed);
        self.index.emit_metrics();
        info!(
            instances = count,
            label_keys = self.index.label_keys_count(),
            version = ?version,
            "Initial enumeration loaded"
        );

        let mut stream = self.source.watch(version);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Reconciler received shutdown signal");
                    return Ok(());
                }

                result = stream.next() => {
                    match result {
                        Some(Ok(event)) => Self::apply(&self.index, event),
                        Some(Err(e)) => {
                            warn!("Instance source error: {}", e);
                            metrics::record_reconcile_event(ReconcileEventType::Error);
                        }
                        None => {
                            warn!("Instance change stream ended");
                            return Err(HostportError::Source("change stream ended".into()));
                        }
                    }
                }
            }
        }
    }

    /// Apply a single change event to the index.
    pub fn apply(index: &LiveIndex, event: SourceEvent) {
        match event {
            SourceEvent::Added(instance) => {
                debug!(instance = %instance.id(), "instance added");
                index.upsert(instance);
                metrics::record_reconcile_event(ReconcileEventType::Added);
            }
            SourceEvent::Modified(instance) => {
                debug!(instance = %instance.id(), "instance modified");
                index.upsert(instance);
                metrics::record_reconcile_event(ReconcileEventType::Modified);
            }
            SourceEvent::Deleted(instance) => {
                debug!(instance = %instance.id(), "instance deleted");
                index.remove(&instance.id());
                metrics::record_reconcile_event(ReconcileEventType::Deleted);
            }
            SourceEvent::Restarted(listing) => {
                info!(
                    instances = listing.instances.len(),
                    "Source enumerated again, rebuilding index"
                );
                index.replace_all(listing.instances);
                metrics::record_reconcile_event(ReconcileEventType::Restarted);
            }
        }
    }
}
