//! Cluster data sources feeding the index.
//!
//! A source provides a one-shot enumeration of instances plus an ordered
//! stream of changes starting right after that enumeration. Keeping the
//! stream alive across disconnects is the source's job, not the reconciler's.

pub mod kubernetes;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::HostportError;
use crate::instance::Instance;

pub use self::kubernetes::KubeSource;

/// Result of a full enumeration.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    /// Every instance matching the source's selection.
    pub instances: Vec<Instance>,
    /// Opaque position to resume watching from.
    pub version: Option<String>,
}

/// A change notification.
#[derive(Debug, Clone)]
pub enum SourceEvent {
    /// A new instance appeared.
    Added(Instance),
    /// An existing instance changed.
    Modified(Instance),
    /// An instance was removed. Carries its last known state.
    Deleted(Instance),
    /// The source lost track of history and enumerated again; the listing
    /// replaces everything seen before.
    Restarted(Listing),
}

/// A listable, watchable set of instances.
#[async_trait]
pub trait InstanceSource: Send + Sync + 'static {
    /// Enumerate all matching instances.
    async fn list(&self) -> Result<Listing, HostportError>;

    /// Stream changes that happened after the listing at `version`.
    fn watch(&self, version: Option<String>)
        -> BoxStream<'static, Result<SourceEvent, HostportError>>;
}

/// In-process source driven through a [`MemoryFeed`].
///
/// The initial listing is fixed at construction; events pushed into the feed
/// are delivered in order to the single watcher.
pub struct MemorySource {
    initial: Vec<Instance>,
    events: Mutex<Option<mpsc::UnboundedReceiver<Result<SourceEvent, HostportError>>>>,
}

/// Sending half of a [`MemorySource`].
#[derive(Debug, Clone)]
pub struct MemoryFeed {
    tx: mpsc::UnboundedSender<Result<SourceEvent, HostportError>>,
}

impl MemorySource {
    /// Create a source that lists `initial` and a feed to push changes with.
    pub fn new(initial: Vec<Instance>) -> (Self, MemoryFeed) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                initial,
                events: Mutex::new(Some(rx)),
            },
            MemoryFeed { tx },
        )
    }
}

#[async_trait]
impl InstanceSource for MemorySource {
    async fn list(&self) -> Result<Listing, HostportError> {
        Ok(Listing {
            instances: self.initial.clone(),
            version: None,
        })
    }

    fn watch(
        &self,
        _version: Option<String>,
    ) -> BoxStream<'static, Result<SourceEvent, HostportError>> {
        match self.events.lock().take() {
            Some(rx) => futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|event| (event, rx))
            })
            .boxed(),
            None => futures::stream::once(async {
                Err(HostportError::Source("memory source already watched".into()))
            })
            .boxed(),
        }
    }
}

impl MemoryFeed {
    fn send(&self, event: Result<SourceEvent, HostportError>) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Announce a new instance. Returns false once the watcher is gone.
    pub fn add(&self, instance: Instance) -> bool {
        self.send(Ok(SourceEvent::Added(instance)))
    }

    /// Announce a changed instance.
    pub fn modify(&self, instance: Instance) -> bool {
        self.send(Ok(SourceEvent::Modified(instance)))
    }

    /// Announce a removed instance.
    pub fn delete(&self, instance: Instance) -> bool {
        self.send(Ok(SourceEvent::Deleted(instance)))
    }

    /// Announce a fresh enumeration.
    pub fn restart(&self, instances: Vec<Instance>) -> bool {
        self.send(Ok(SourceEvent::Restarted(Listing {
            instances,
            version: None,
        })))
    }

    /// Inject a stream error.
    pub fn fail(&self, message: &str) -> bool {
        self.send(Err(HostportError::Source(message.to_string())))
    }
}
