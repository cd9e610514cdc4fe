//! rumqttc-backed broker transport
//!
//! Each opened link owns one `AsyncClient` and a [`LinkDriver`] task polling the
//! matching `EventLoop`. The driver runs through a statum lifecycle:
//!
//! ```text
//! Initializing ──► Polling ──► Closing ──► Closed
//!                     │           ▲
//!                     └───────────┘
//!     (outgoing DISCONNECT, cancellation, or event receiver gone)
//! ```
//!
//! After a connection error the driver reports `Failed`, waits `reconnect_delay` and
//! polls again, which makes rumqttc reconnect. The session decides what to do with the
//! reports; the driver never gives up on its own.

use super::config::BrokerEndpoint;
use super::message_manager::{ConnectionEvent, Generation, LinkEvent};
use super::transport::{BrokerLink, BrokerTransport, TransportError};
use crate::config::DashboardSettings;
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubscribeReasonCode,
    Transport,
};
use statum::{machine, state};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

const REQUEST_CAPACITY: usize = 100;

/// Transport flavours derived from the URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerScheme {
    Tcp,
    Tls,
    Ws,
    Wss,
}

impl BrokerScheme {
    fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "mqtt" | "tcp" => Some(BrokerScheme::Tcp),
            "mqtts" | "ssl" => Some(BrokerScheme::Tls),
            "ws" => Some(BrokerScheme::Ws),
            "wss" => Some(BrokerScheme::Wss),
            _ => None,
        }
    }

    fn default_port(self) -> u16 {
        match self {
            BrokerScheme::Tcp => 1883,
            BrokerScheme::Tls => 8883,
            BrokerScheme::Ws => 80,
            BrokerScheme::Wss => 443,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub scheme: BrokerScheme,
    pub host: String,
    pub port: u16,
    /// Normalized URL, used as-is for websocket transports
    pub url: String,
}

/// Parses a broker URL. A bare `host:port` is treated as plain MQTT over TCP.
pub fn parse_broker_url(raw: &str) -> Result<BrokerAddress, TransportError> {
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("mqtt://{}", raw)
    };

    let url = Url::parse(&with_scheme).map_err(|e| TransportError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    let scheme = BrokerScheme::from_scheme(url.scheme())
        .ok_or_else(|| TransportError::UnsupportedScheme(url.scheme().to_string()))?;

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| TransportError::InvalidUrl {
            url: raw.to_string(),
            reason: "missing host".to_string(),
        })?
        .to_string();

    let port = url.port().unwrap_or(scheme.default_port());

    Ok(BrokerAddress {
        scheme,
        host,
        port,
        url: url.to_string(),
    })
}

/// Builds client options for `endpoint`, including credentials when configured.
pub fn mqtt_options(
    client_id: String,
    endpoint: &BrokerEndpoint,
    keep_alive: Duration,
) -> Result<MqttOptions, TransportError> {
    let address = parse_broker_url(&endpoint.url)?;

    let mut options = match address.scheme {
        BrokerScheme::Tcp | BrokerScheme::Tls => {
            MqttOptions::new(client_id, address.host.clone(), address.port)
        }
        BrokerScheme::Ws | BrokerScheme::Wss => {
            MqttOptions::new(client_id, address.url.clone(), address.port)
        }
    };

    match address.scheme {
        BrokerScheme::Tcp => {}
        BrokerScheme::Tls => {
            options.set_transport(Transport::tls_with_default_config());
        }
        BrokerScheme::Ws => {
            options.set_transport(Transport::Ws);
        }
        BrokerScheme::Wss => {
            options.set_transport(Transport::wss_with_default_config());
        }
    }

    options.set_keep_alive(keep_alive);

    if let Some((username, password)) = endpoint.credentials() {
        options.set_credentials(username, password);
    }

    Ok(options)
}

/// Opens rumqttc links.
#[derive(Debug, Clone)]
pub struct MqttTransport {
    client_id_prefix: String,
    keep_alive: Duration,
    reconnect_delay: Duration,
    disconnect_grace: Duration,
}

impl MqttTransport {
    pub fn new(settings: &DashboardSettings) -> Self {
        Self {
            client_id_prefix: settings.client_id_prefix.clone(),
            keep_alive: settings.keep_alive(),
            reconnect_delay: settings.reconnect_delay(),
            disconnect_grace: settings.disconnect_grace(),
        }
    }

    fn client_id(&self, generation: Generation) -> String {
        format!(
            "{}-{}-{}",
            self.client_id_prefix,
            std::process::id(),
            generation.value()
        )
    }
}

impl BrokerTransport for MqttTransport {
    fn open(
        &self,
        generation: Generation,
        endpoint: &BrokerEndpoint,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> Result<Box<dyn BrokerLink>, TransportError> {
        let options = mqtt_options(self.client_id(generation), endpoint, self.keep_alive)?;
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let shutdown = CancellationToken::new();

        let driver = LinkDriver::create(
            generation,
            eventloop,
            events,
            shutdown.clone(),
            self.reconnect_delay,
        )
        .activate();

        tokio::spawn(async move {
            let closing = driver.run_until_shutdown().await;
            let _closed = closing.shutdown().await;
        });

        info!("Opened link {} to {}", generation, endpoint);

        Ok(Box::new(MqttLink {
            generation,
            client,
            shutdown,
            disconnect_grace: self.disconnect_grace,
        }))
    }
}

/// Handle to one rumqttc connection.
pub struct MqttLink {
    generation: Generation,
    client: AsyncClient,
    shutdown: CancellationToken,
    disconnect_grace: Duration,
}

impl BrokerLink for MqttLink {
    fn generation(&self) -> Generation {
        self.generation
    }

    fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), TransportError> {
        self.client
            .try_subscribe(filter, qos)
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        self.client
            .try_publish(topic, qos, retain, payload)
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    /// Queues a DISCONNECT and cancels the driver once the grace period is over,
    /// whether or not the broker ever saw it.
    fn disconnect(&self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!("Link {} could not queue DISCONNECT: {}", self.generation, e);
            self.shutdown.cancel();
            return;
        }

        let shutdown = self.shutdown.clone();
        let grace = self.disconnect_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            shutdown.cancel();
        });
    }
}

/// States of a link driver task
#[state]
#[derive(Debug, Clone)]
pub enum LinkDriverState {
    Initializing, // Event loop created, nothing polled yet
    Polling,      // Forwarding broker events
    Closing,      // Loop left, final event pending
    Closed,       // Done
}

#[machine]
pub struct LinkDriver<S: LinkDriverState> {
    generation: Generation,
    eventloop: EventLoop,
    events: mpsc::Sender<ConnectionEvent>,
    shutdown: CancellationToken,
    reconnect_delay: Duration,
}

impl LinkDriver<Initializing> {
    pub fn create(
        generation: Generation,
        eventloop: EventLoop,
        events: mpsc::Sender<ConnectionEvent>,
        shutdown: CancellationToken,
        reconnect_delay: Duration,
    ) -> Self {
        debug!("Initializing link driver {}", generation);
        Self::new(generation, eventloop, events, shutdown, reconnect_delay)
    }

    pub fn activate(self) -> LinkDriver<Polling> {
        self.transition()
    }
}

impl LinkDriver<Polling> {
    /// Polls the event loop and forwards what the session cares about.
    pub async fn run_until_shutdown(mut self) -> LinkDriver<Closing> {
        loop {
            let polled = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    debug!("Link driver {} cancelled", self.generation);
                    break;
                }
                polled = self.eventloop.poll() => polled,
            };

            let event = match polled {
                Ok(event) => match translate(event) {
                    Polled::Forward(event) => event,
                    Polled::Ignore => continue,
                    Polled::Stop => {
                        debug!("Link driver {} sent DISCONNECT", self.generation);
                        break;
                    }
                },
                Err(e) => {
                    if self.shutdown.is_cancelled() {
                        break;
                    }
                    warn!("Link {} connection error: {}", self.generation, e);
                    if !forward(&self.events, self.generation, LinkEvent::Failed(e.to_string()))
                        .await
                    {
                        break;
                    }
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.reconnect_delay) => {}
                    }
                    continue;
                }
            };

            if !forward(&self.events, self.generation, event).await {
                debug!("Event receiver gone, stopping link driver {}", self.generation);
                break;
            }
        }

        self.transition()
    }
}

impl LinkDriver<Closing> {
    /// Reports the link as closed. The session ignores this for superseded links.
    pub async fn shutdown(self) -> LinkDriver<Closed> {
        forward(&self.events, self.generation, LinkEvent::Closed).await;
        info!("Link {} closed", self.generation);
        self.transition()
    }
}

impl LinkDriver<Closed> {}

/// What the driver does with one polled event.
#[derive(Debug, PartialEq, Eq)]
enum Polled {
    Forward(LinkEvent),
    Ignore,
    /// Our own DISCONNECT went out; the link is done
    Stop,
}

fn translate(event: Event) -> Polled {
    match event {
        Event::Incoming(Packet::ConnAck(_)) => Polled::Forward(LinkEvent::Connected),
        Event::Incoming(Packet::SubAck(ack)) => {
            let accepted = ack
                .return_codes
                .iter()
                .all(|code| matches!(code, SubscribeReasonCode::Success(_)));
            if accepted {
                Polled::Forward(LinkEvent::Subscribed)
            } else {
                Polled::Forward(LinkEvent::Failed(
                    "subscription rejected by broker".to_string(),
                ))
            }
        }
        Event::Incoming(Packet::Publish(publish)) => Polled::Forward(LinkEvent::Message {
            topic: publish.topic,
            payload: publish.payload.to_vec(),
        }),
        Event::Outgoing(Outgoing::Disconnect) => Polled::Stop,
        _ => Polled::Ignore,
    }
}

// Borrows only the sender; the driver itself holds a non-Sync event loop.
async fn forward(
    events: &mpsc::Sender<ConnectionEvent>,
    generation: Generation,
    event: LinkEvent,
) -> bool {
    events
        .send(ConnectionEvent::new(generation, event))
        .await
        .is_ok()
}
