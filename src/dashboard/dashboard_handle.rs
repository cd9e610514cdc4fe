use super::DashboardView;
use crate::config::DashboardSettings;
use crate::mqtt::command_publisher::PublishError;
use crate::mqtt::config::{BrokerSelection, CredentialField};
use crate::mqtt::message_manager::{ConnectionEvent, Generation};
use crate::mqtt::session_manager::{BrokerSessionManager, ConnectionStatus, SessionError};
use crate::mqtt::transport::BrokerTransport;
use crate::persistence::SelectionStore;
use crate::sensor::SensorKey;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

macro_rules! reply {
    ($response_tx:expr, $result:expr) => {
        if $response_tx.send($result).is_err() {
            debug!("Requester dropped before the reply");
        }
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DashboardError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("clear failed: {0}")]
    Publish(#[from] PublishError),

    #[error("dashboard task has stopped")]
    Stopped,
}

pub enum DashboardCommand {
    SelectBroker {
        index: usize,
        response_tx: oneshot::Sender<Result<(), SessionError>>,
    },
    UpdateCredential {
        field: CredentialField,
        value: String,
        response_tx: oneshot::Sender<()>,
    },
    ClearSensor {
        key: SensorKey,
        response_tx: oneshot::Sender<Result<(), PublishError>>,
    },
    Shutdown {
        response_tx: oneshot::Sender<()>,
    },
}

/// Cheap fingerprint of the manager state a view depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ViewStamp {
    generation: Generation,
    status: ConnectionStatus,
    selection_revision: u64,
    store_revision: u64,
}

impl ViewStamp {
    fn of(manager: &BrokerSessionManager) -> Self {
        Self {
            generation: manager.generation(),
            status: manager.status().clone(),
            selection_revision: manager.selection_revision(),
            store_revision: manager.store().revision(),
        }
    }
}

/// Client side of the dashboard task.
///
/// Every command is answered only after the resulting view has been published, so a
/// caller that awaited a command and then reads [`DashboardHandle::view`] sees its
/// effect.
pub struct DashboardHandle {
    tx: mpsc::Sender<DashboardCommand>,
    view: watch::Receiver<DashboardView>,
    worker: JoinHandle<()>,
}

impl DashboardHandle {
    /// Builds the session, connects to the selected broker and starts the task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        settings: &DashboardSettings,
        selection: BrokerSelection,
        transport: Box<dyn BrokerTransport>,
        persistence: Box<dyn SelectionStore>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel::<ConnectionEvent>(settings.event_buffer);
        let (tx, rx) = mpsc::channel::<DashboardCommand>(settings.command_buffer);

        let mut manager = BrokerSessionManager::new(selection, transport, persistence, event_tx);
        manager.start();

        let (view_tx, view) = watch::channel(DashboardView::capture(&manager));
        let worker = tokio::spawn(run_dashboard(manager, rx, event_rx, view_tx));

        Self { tx, view, worker }
    }

    pub async fn select_broker(&self, index: usize) -> Result<(), DashboardError> {
        Ok(self
            .request(|response_tx| DashboardCommand::SelectBroker { index, response_tx })
            .await??)
    }

    pub async fn update_credential(
        &self,
        field: CredentialField,
        value: String,
    ) -> Result<(), DashboardError> {
        self.request(|response_tx| DashboardCommand::UpdateCredential {
            field,
            value,
            response_tx,
        })
        .await
    }

    pub async fn clear_sensor(&self, key: SensorKey) -> Result<(), DashboardError> {
        Ok(self
            .request(|response_tx| DashboardCommand::ClearSensor { key, response_tx })
            .await??)
    }

    /// Receiver that is notified on every published view.
    pub fn subscribe(&self) -> watch::Receiver<DashboardView> {
        self.view.clone()
    }

    /// Latest published view.
    pub fn view(&self) -> DashboardView {
        self.view.borrow().clone()
    }

    /// Tears down the connection and waits for the task to finish.
    pub async fn shutdown(self) -> Result<(), DashboardError> {
        let stopped = self
            .request(|response_tx| DashboardCommand::Shutdown { response_tx })
            .await;
        if let Err(e) = self.worker.await {
            error!("Dashboard task ended abnormally: {}", e);
        }
        stopped
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> DashboardCommand,
    ) -> Result<T, DashboardError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(command(response_tx))
            .await
            .map_err(|_| DashboardError::Stopped)?;
        response_rx.await.map_err(|_| DashboardError::Stopped)
    }
}

async fn run_dashboard(
    mut manager: BrokerSessionManager,
    mut commands: mpsc::Receiver<DashboardCommand>,
    mut events: mpsc::Receiver<ConnectionEvent>,
    view_tx: watch::Sender<DashboardView>,
) {
    let mut stamp = ViewStamp::of(&manager);
    info!("Dashboard task started");

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    info!("All dashboard handles dropped");
                    manager.shutdown();
                    break;
                };
                match command {
                    DashboardCommand::SelectBroker { index, response_tx } => {
                        let result = manager.select_broker(index);
                        if let Err(e) = &result {
                            error!("Rejected broker selection: {}", e);
                        }
                        publish_view(&manager, &mut stamp, &view_tx);
                        reply!(response_tx, result);
                    }
                    DashboardCommand::UpdateCredential { field, value, response_tx } => {
                        manager.update_credential(field, value);
                        publish_view(&manager, &mut stamp, &view_tx);
                        reply!(response_tx, ());
                    }
                    DashboardCommand::ClearSensor { key, response_tx } => {
                        let result = manager.command_publisher().clear(&key);
                        if let Err(e) = &result {
                            error!("Could not clear {}: {}", key, e);
                        }
                        reply!(response_tx, result);
                    }
                    DashboardCommand::Shutdown { response_tx } => {
                        manager.shutdown();
                        publish_view(&manager, &mut stamp, &view_tx);
                        reply!(response_tx, ());
                        break;
                    }
                }
            }
            Some(event) = events.recv() => {
                manager.handle_event(event);
                publish_view(&manager, &mut stamp, &view_tx);
            }
        }
    }

    info!("Dashboard task stopped");
}

fn publish_view(
    manager: &BrokerSessionManager,
    stamp: &mut ViewStamp,
    view_tx: &watch::Sender<DashboardView>,
) {
    let current = ViewStamp::of(manager);
    if current == *stamp {
        return;
    }
    *stamp = current;
    view_tx.send_replace(DashboardView::capture(manager));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::message_manager::LinkEvent;
    use crate::mqtt::testing::{FakeTransport, MemorySelectionStore};
    use crate::sensor::TagFilter;
    use rumqttc::QoS;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    fn spawn_with(transport: &FakeTransport, persistence: &MemorySelectionStore) -> DashboardHandle {
        DashboardHandle::spawn(
            &DashboardSettings::default(),
            BrokerSelection::default(),
            Box::new(transport.clone()),
            Box::new(persistence.clone()),
        )
    }

    async fn send(transport: &FakeTransport, event: ConnectionEvent) {
        let link = transport.link(event.generation).unwrap();
        link.events.send(event).await.unwrap();
    }

    async fn bring_up(transport: &FakeTransport, generation: Generation) {
        send(transport, ConnectionEvent::new(generation, LinkEvent::Connected)).await;
        send(transport, ConnectionEvent::new(generation, LinkEvent::Subscribed)).await;
    }

    async fn wait_for_view<F>(handle: &DashboardHandle, mut predicate: F) -> DashboardView
    where
        F: FnMut(&DashboardView) -> bool,
    {
        let mut rx = handle.subscribe();
        let view = timeout(WAIT, rx.wait_for(|view| predicate(view)))
            .await
            .expect("view did not reach expected state")
            .unwrap();
        view.clone()
    }

    fn instances(view: &DashboardView) -> Vec<String> {
        view.readings
            .iter()
            .map(|r| r.instance().to_string())
            .collect()
    }

    #[tokio::test]
    async fn spawn_connects_to_selected_broker() {
        let transport = FakeTransport::default();
        let handle = spawn_with(&transport, &MemorySelectionStore::default());

        let view = handle.view();
        assert_eq!(view.status, ConnectionStatus::Connecting);
        assert_eq!(view.selected_broker().unwrap().name, "Haukkakallio");

        bring_up(&transport, view.generation).await;
        let view = wait_for_view(&handle, |v| v.status == ConnectionStatus::Subscribed).await;
        assert_eq!(view.generation.value(), 1);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn readings_flow_into_published_views() {
        let transport = FakeTransport::default();
        let handle = spawn_with(&transport, &MemorySelectionStore::default());
        let generation = handle.view().generation;
        bring_up(&transport, generation).await;

        send(
            &transport,
            ConnectionEvent::message(
                generation,
                "/sensor/s1/t/state",
                r#"{"tag":"t","instance":"s1","temperature":21.5,"ts":1690000000000}"#,
            ),
        )
        .await;
        let view = wait_for_view(&handle, |v| !v.readings.is_empty()).await;
        let temperatures = view.query(&TagFilter::single("t"));
        assert_eq!(temperatures.len(), 1);
        assert_eq!(temperatures[0].number("temperature"), Some(21.5));

        send(
            &transport,
            ConnectionEvent::message(generation, "/sensor/s1/t/state", ""),
        )
        .await;
        let view = wait_for_view(&handle, |v| v.readings.is_empty()).await;
        assert!(view.query(&TagFilter::single("t")).is_empty());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn switching_broker_empties_view_before_new_subscription() {
        let transport = FakeTransport::default();
        let handle = spawn_with(&transport, &MemorySelectionStore::default());
        let first = handle.view().generation;
        bring_up(&transport, first).await;
        send(
            &transport,
            ConnectionEvent::message(first, "/sensor/s1/t/state", r#"{"temperature":21.5}"#),
        )
        .await;
        wait_for_view(&handle, |v| v.readings.len() == 1).await;

        handle.select_broker(1).await.unwrap();

        let view = handle.view();
        assert!(view.readings.is_empty());
        assert_eq!(view.status, ConnectionStatus::Connecting);
        assert_eq!(view.selected, 1);
        let new_link = transport.link(view.generation).unwrap();
        assert!(new_link.subscriptions.is_empty());
        assert!(transport.link(first).unwrap().disconnected);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn rapid_switches_discard_superseded_traffic() {
        let transport = FakeTransport::default();
        let handle = spawn_with(&transport, &MemorySelectionStore::default());

        handle.select_broker(0).await.unwrap();
        let superseded = handle.view().generation;
        handle.select_broker(1).await.unwrap();
        let current = handle.view().generation;

        bring_up(&transport, superseded).await;
        send(
            &transport,
            ConnectionEvent::message(superseded, "/sensor/old/t/state", r#"{"temperature":1.0}"#),
        )
        .await;
        bring_up(&transport, current).await;
        send(
            &transport,
            ConnectionEvent::message(current, "/sensor/new/t/state", r#"{"temperature":2.0}"#),
        )
        .await;

        let view = wait_for_view(&handle, |v| !v.readings.is_empty()).await;
        assert_eq!(instances(&view), vec!["new"]);
        assert!(transport.link(superseded).unwrap().subscriptions.is_empty());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn out_of_range_selection_is_reported() {
        let transport = FakeTransport::default();
        let handle = spawn_with(&transport, &MemorySelectionStore::default());

        assert_eq!(
            handle.select_broker(5).await,
            Err(DashboardError::Session(SessionError::BrokerIndexOutOfRange {
                index: 5,
                available: 2
            }))
        );
        assert_eq!(transport.links().len(), 1);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn credential_updates_are_persisted_and_published() {
        let transport = FakeTransport::default();
        let persistence = MemorySelectionStore::default();
        let handle = spawn_with(&transport, &persistence);

        handle
            .update_credential(CredentialField::Username, "viewer".into())
            .await
            .unwrap();

        assert_eq!(handle.view().brokers[0].username, "viewer");
        assert_eq!(persistence.saved().len(), 1);
        assert_eq!(transport.links().len(), 1);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn clear_sensor_requires_connection() {
        let transport = FakeTransport::default();
        let handle = spawn_with(&transport, &MemorySelectionStore::default());
        let key = SensorKey::new("s1", "t");

        assert_eq!(
            handle.clear_sensor(key.clone()).await,
            Err(DashboardError::Publish(PublishError::NotConnected))
        );

        let generation = handle.view().generation;
        bring_up(&transport, generation).await;
        wait_for_view(&handle, |v| v.status == ConnectionStatus::Subscribed).await;
        handle.clear_sensor(key).await.unwrap();

        assert_eq!(
            transport.link(generation).unwrap().publishes,
            vec![("/sensor/s1/t/state".to_string(), QoS::AtLeastOnce, true, Vec::new())]
        );

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_disconnects_and_stops_task() {
        let transport = FakeTransport::default();
        let handle = spawn_with(&transport, &MemorySelectionStore::default());
        let mut views = handle.subscribe();
        let generation = handle.view().generation;

        handle.shutdown().await.unwrap();

        assert!(transport.link(generation).unwrap().disconnected);
        assert_eq!(views.borrow_and_update().status, ConnectionStatus::Disconnected);
    }
}
