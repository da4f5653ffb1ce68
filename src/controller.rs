//! Lifecycle of the reconciliation task.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::HostportError;
use crate::index::LiveIndex;
use crate::reconcile::Reconciler;
use crate::source::InstanceSource;

/// Interval for polling readiness.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(50);

struct Lifecycle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_rx: Option<oneshot::Receiver<()>>,
    task: Option<JoinHandle<Result<(), HostportError>>>,
    joined: bool,
}

/// Owns the index and the background reconciler feeding it.
///
/// Reconciliation starts at most once. Shutdown may be requested at most
/// once; a second request is reported as a conflict.
pub struct Controller {
    source: Arc<dyn InstanceSource>,
    index: LiveIndex,
    lifecycle: Mutex<Lifecycle>,
}

impl Controller {
    /// Create a stopped controller.
    pub fn new(source: Arc<dyn InstanceSource>, index: LiveIndex) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        Self {
            source,
            index,
            lifecycle: Mutex::new(Lifecycle {
                shutdown_tx: Some(shutdown_tx),
                shutdown_rx: Some(shutdown_rx),
                task: None,
                joined: false,
            }),
        }
    }

    /// The index kept current by this controller.
    pub fn index(&self) -> &LiveIndex {
        &self.index
    }

    /// Spawn the reconciler on the current runtime.
    ///
    /// If shutdown was already requested the reconciler exits right away.
    pub fn start(&self) -> Result<(), HostportError> {
        let mut lifecycle = self.lifecycle.lock();
        let shutdown_rx = lifecycle
            .shutdown_rx
            .take()
            .ok_or(HostportError::AlreadyStarted)?;

        let reconciler = Reconciler::new(self.source.clone(), self.index.clone());
        lifecycle.task = Some(tokio::spawn(async move {
            let result = reconciler.run(shutdown_rx).await;
            if let Err(e) = &result {
                warn!("Reconciler stopped: {}", e);
            }
            result
        }));

        info!("Reconciliation started");
        Ok(())
    }

    /// True once the initial enumeration has been loaded.
    pub fn ready(&self) -> bool {
        self.index.synced()
    }

    /// Wait until the initial enumeration has been loaded.
    ///
    /// Fails if the reconciler exits first.
    pub async fn wait_synced(&self) -> Result<(), HostportError> {
        loop {
            if self.ready() {
                return Ok(());
            }
            if self.finished() {
                return Err(HostportError::Source(
                    "reconciler exited before initial enumeration".into(),
                ));
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    /// Ask the reconciler to stop.
    pub fn shutdown(&self) -> Result<(), HostportError> {
        let shutdown_tx = self
            .lifecycle
            .lock()
            .shutdown_tx
            .take()
            .ok_or(HostportError::ShutdownConflict)?;

        // The reconciler may already have exited on its own.
        let _ = shutdown_tx.send(());
        info!("Reconciliation shutdown requested");
        Ok(())
    }

    /// True once the reconciler task has exited or was joined. False if
    /// never started.
    pub fn finished(&self) -> bool {
        let lifecycle = self.lifecycle.lock();
        lifecycle.joined
            || lifecycle
                .task
                .as_ref()
                .is_some_and(|task| task.is_finished())
    }

    /// Wait for the reconciler task and return its outcome.
    ///
    /// Returns immediately if the reconciler was never started or was
    /// already joined.
    pub async fn join(&self) -> Result<(), HostportError> {
        let task = {
            let mut lifecycle = self.lifecycle.lock();
            let task = lifecycle.task.take();
            lifecycle.joined |= task.is_some();
            task
        };
        match task {
            Some(task) => task
                .await
                .map_err(|e| HostportError::Source(format!("reconciler task failed: {e}")))?,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Selector;
    use crate::index::InstanceIndex;
    use crate::instance::Instance;
    use crate::source::MemorySource;

    fn make_instance(name: &str, ip: &str) -> Instance {
        Instance {
            namespace: "ns1".to_string(),
            name: name.to_string(),
            labels: [("app".to_string(), "svc1".to_string())].into(),
            host_ip: ip.to_string(),
            ..Default::default()
        }
    }

    fn controller(initial: Vec<Instance>) -> (Controller, crate::source::MemoryFeed) {
        let (source, feed) = MemorySource::new(initial);
        let index = LiveIndex::new(Selector::new("app", "", false));
        (Controller::new(Arc::new(source), index), feed)
    }

    #[tokio::test]
    async fn test_start_syncs_index() {
        let (controller, _feed) = controller(vec![make_instance("a", "10.0.0.5")]);
        assert!(!controller.ready());

        controller.start().unwrap();
        controller.wait_synced().await.unwrap();

        assert_eq!(controller.index().by_label_key("svc1.ns1").unwrap().len(), 1);

        controller.shutdown().unwrap();
        controller.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (controller, _feed) = controller(Vec::new());
        controller.start().unwrap();
        assert!(matches!(controller.start(), Err(HostportError::AlreadyStarted)));

        controller.shutdown().unwrap();
        controller.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_second_shutdown_conflicts() {
        let (controller, _feed) = controller(Vec::new());
        controller.start().unwrap();

        controller.shutdown().unwrap();
        assert!(matches!(
            controller.shutdown(),
            Err(HostportError::ShutdownConflict)
        ));
        controller.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_before_start() {
        let (controller, _feed) = controller(vec![make_instance("a", "10.0.0.5")]);
        controller.shutdown().unwrap();
        controller.start().unwrap();

        controller.join().await.unwrap();
        assert!(!controller.ready());
    }

    #[tokio::test]
    async fn test_join_without_start() {
        let (controller, _feed) = controller(Vec::new());
        assert!(!controller.finished());
        controller.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_synced_fails_if_reconciler_exits() {
        let (controller, _feed) = controller(Vec::new());
        controller.shutdown().unwrap();
        controller.start().unwrap();

        assert!(matches!(
            controller.wait_synced().await,
            Err(HostportError::Source(_))
        ));
    }

    #[tokio::test]
    async fn test_wait_synced_after_join_does_not_hang() {
        let (controller, _feed) = controller(Vec::new());
        controller.shutdown().unwrap();
        controller.start().unwrap();
        controller.join().await.unwrap();

        assert!(controller.finished());
        let result = tokio::time::timeout(Duration::from_secs(1), controller.wait_synced())
            .await
            .expect("wait_synced kept polling after join");
        assert!(matches!(result, Err(HostportError::Source(_))));
    }

    #[tokio::test]
    async fn test_join_reports_stream_end() {
        let (controller, feed) = controller(Vec::new());
        controller.start().unwrap();
        drop(feed);

        assert!(matches!(
            controller.join().await,
            Err(HostportError::Source(_))
        ));
    }
}
