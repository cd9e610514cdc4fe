use super::{PersistenceError, SelectionStore};
use crate::mqtt::config::BrokerSelection;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Moves selection saves off the caller's task.
///
/// `save` only queues the selection; a background task writes it through the wrapped
/// store on the blocking pool. When several saves queue up, only the newest is written.
/// Saves still queued when the runtime shuts down are lost.
pub struct SelectionWriter<S> {
    store: Arc<S>,
    tx: UnboundedSender<BrokerSelection>,
    worker_handle: JoinHandle<()>,
}

impl<S> SelectionWriter<S>
where
    S: SelectionStore + Sync,
{
    /// Must be called inside a tokio runtime.
    pub fn spawn(store: S) -> Self {
        let store = Arc::new(store);
        let (tx, rx) = unbounded_channel();
        let worker_handle = tokio::spawn(write_loop(Arc::clone(&store), rx));
        Self {
            store,
            tx,
            worker_handle,
        }
    }

    pub fn is_running(&self) -> bool {
        !self.worker_handle.is_finished()
    }
}

async fn write_loop<S>(store: Arc<S>, mut rx: UnboundedReceiver<BrokerSelection>)
where
    S: SelectionStore + Sync,
{
    while let Some(mut selection) = rx.recv().await {
        let mut skipped = 0usize;
        while let Ok(newer) = rx.try_recv() {
            selection = newer;
            skipped += 1;
        }
        if skipped > 0 {
            debug!("Coalesced {} queued selection saves", skipped);
        }

        let store = Arc::clone(&store);
        match tokio::task::spawn_blocking(move || store.save(&selection)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Failed to persist broker selection: {}", e),
            Err(e) => error!("Selection save task failed: {}", e),
        }
    }
    debug!("Selection writer stopped");
}

impl<S> SelectionStore for SelectionWriter<S>
where
    S: SelectionStore + Sync,
{
    fn load(&self) -> Result<Option<BrokerSelection>, PersistenceError> {
        self.store.load()
    }

    fn save(&self, selection: &BrokerSelection) -> Result<(), PersistenceError> {
        self.tx
            .send(selection.clone())
            .map_err(|_| PersistenceError::WriterStopped)
    }
}
