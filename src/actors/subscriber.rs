//! BrokerSubscriber - Receives sensor payloads from the MQTT broker
//!
//! The subscriber only turns payload bytes into text and pushes them onto
//! the ingest queue. Decoding, evaluation and storage happen later in the
//! pipeline actor.
//!
//! ## Reconnects
//!
//! Every transport or protocol error moves the connection back to
//! `Disconnected`. The subscriber then sleeps for the next backoff delay and
//! lets the event loop reconnect. A refused or failed subscribe counts as a
//! connection failure too: the connection is dropped and a new one is opened
//! after the backoff delay. A fresh subscribe request is issued after every
//! accepted handshake, and the backoff is only reset once the broker
//! acknowledges it.

use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS,
    SubscribeReasonCode, Transport,
};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time;
use tracing::{debug, error, info, instrument, trace, warn};

use super::messages::SubscriberCommand;
use crate::{
    config::BrokerConfig,
    connection::{Backoff, ConnectionEvent, ConnectionState},
    queue::{IngestSender, RawMessage},
};

/// Capacity of the client request channel
const REQUEST_CHANNEL_CAPACITY: usize = 10;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("subscribe request failed: {0}")]
    Subscribe(#[from] rumqttc::ClientError),

    #[error("broker refused subscription to {topic}")]
    SubscriptionRefused { topic: String },

    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("ingest queue closed")]
    QueueClosed,

    #[error("giving up after {attempts} reconnect attempt(s)")]
    RetriesExhausted { attempts: u32 },
}

/// Build client options from the broker configuration
pub fn mqtt_options(config: &BrokerConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(config.keep_alive().max(Duration::from_secs(5)));

    if let Some(username) = &config.username {
        options.set_credentials(username, config.password.as_deref().unwrap_or_default());
    }

    if config.tls {
        options.set_transport(Transport::tls_with_default_config());
    }

    options
}

pub struct BrokerSubscriber {
    config: BrokerConfig,
    sender: IngestSender,
    state: ConnectionState,
    backoff: Backoff,

    /// Command receiver
    command_rx: mpsc::Receiver<SubscriberCommand>,

    /// Connection state publisher
    state_tx: watch::Sender<ConnectionState>,

    received: u64,
}

impl BrokerSubscriber {
    pub fn new(
        config: BrokerConfig,
        sender: IngestSender,
        command_rx: mpsc::Receiver<SubscriberCommand>,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        debug!(
            "creating broker subscriber for {}:{} (topic {})",
            config.host, config.port, config.topic
        );

        Self {
            backoff: Backoff::new(config.reconnect),
            config,
            sender,
            state: ConnectionState::Disconnected,
            command_rx,
            state_tx,
            received: 0,
        }
    }

    fn connect(&self) -> (AsyncClient, EventLoop) {
        info!(
            "connecting to {}:{} as {}",
            self.config.host, self.config.port, self.config.client_id
        );
        AsyncClient::new(mqtt_options(&self.config), REQUEST_CHANNEL_CAPACITY)
    }

    /// Run the receive loop until shutdown, queue closure or retry exhaustion
    #[instrument(skip_all)]
    pub async fn run(mut self) -> Result<(), BrokerError> {
        let (mut client, mut eventloop) = self.connect();
        self.transition(ConnectionEvent::Connect);

        let result = loop {
            tokio::select! {
                event = eventloop.poll() => {
                    let failure = match event {
                        Ok(event) => match self.handle_event(event, &client) {
                            Ok(()) => continue,
                            Err(BrokerError::QueueClosed) => break Err(BrokerError::QueueClosed),
                            Err(e) => {
                                // The session is useless without a subscription
                                (client, eventloop) = self.connect();
                                e
                            }
                        },
                        Err(e) => {
                            // rumqttc reports a refused handshake here, not as a ConnAck event
                            if let ConnectionError::ConnectionRefused(code) = &e {
                                error!("broker refused connection: {:?}", code);
                                self.transition(ConnectionEvent::ConnAck { accepted: false });
                            }
                            BrokerError::from(e)
                        }
                    };

                    error!("broker connection lost: {}", failure);
                    self.transition(ConnectionEvent::Error);

                    match self.wait_before_reconnect().await {
                        Ok(true) => self.transition(ConnectionEvent::Connect),
                        Ok(false) => break Ok(()),
                        Err(e) => break Err(e),
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(SubscriberCommand::Shutdown) => info!("shutdown requested"),
                        None => warn!("command channel closed, shutting down"),
                    }
                    break Ok(());
                }
            }
        };

        if let Err(e) = client.try_disconnect() {
            trace!("disconnect request not sent: {}", e);
        }
        self.transition(ConnectionEvent::Error);

        debug!(
            "broker subscriber stopped after {} message(s)",
            self.received
        );
        result
    }

    /// Apply one event from the broker.
    ///
    /// `QueueClosed` is fatal. Any other error means the session must be
    /// replaced by a fresh connection.
    fn handle_event(&mut self, event: Event, client: &AsyncClient) -> Result<(), BrokerError> {
        let Event::Incoming(packet) = event else {
            return Ok(());
        };

        match packet {
            Packet::ConnAck(_) => {
                self.transition(ConnectionEvent::ConnAck { accepted: true });

                debug!("subscribing to {}", self.config.topic);
                client.try_subscribe(&self.config.topic, QoS::AtLeastOnce)?;
            }

            Packet::SubAck(ack) => {
                let granted = ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Success(_)));
                self.transition(ConnectionEvent::SubAck { granted });

                if !granted {
                    return Err(BrokerError::SubscriptionRefused {
                        topic: self.config.topic.clone(),
                    });
                }
                self.backoff.reset();
            }

            Packet::Publish(publish) => {
                trace!(
                    "publish on {} ({} bytes)",
                    publish.topic,
                    publish.payload.len()
                );
                match self.on_payload(&publish.payload) {
                    Ok(()) => {}
                    Err(BrokerError::QueueClosed) => return Err(BrokerError::QueueClosed),
                    Err(e) => warn!("dropping message: {}", e),
                }
            }

            Packet::Disconnect => {
                warn!("broker sent disconnect");
                self.transition(ConnectionEvent::Error);
            }

            _ => {}
        }

        Ok(())
    }

    /// Convert payload bytes to text and enqueue them
    pub fn on_payload(&mut self, payload: &[u8]) -> Result<(), BrokerError> {
        let text = std::str::from_utf8(payload)?.trim();

        if !self.sender.push(RawMessage::new(text)) {
            return Err(BrokerError::QueueClosed);
        }

        self.received += 1;
        Ok(())
    }

    /// Sleep for the next backoff delay; `Ok(false)` means shutdown was requested
    async fn wait_before_reconnect(&mut self) -> Result<bool, BrokerError> {
        if self.backoff.exhausted() {
            return Err(BrokerError::RetriesExhausted {
                attempts: self.backoff.attempt(),
            });
        }

        let delay = self.backoff.next_delay();
        info!(
            "reconnecting in {:?} (attempt {})",
            delay,
            self.backoff.attempt()
        );

        tokio::select! {
            _ = time::sleep(delay) => Ok(true),
            cmd = self.command_rx.recv() => {
                match cmd {
                    Some(SubscriberCommand::Shutdown) => {
                        info!("shutdown requested while reconnecting")
                    }
                    None => warn!("command channel closed, shutting down"),
                }
                Ok(false)
            }
        }
    }

    fn transition(&mut self, event: ConnectionEvent) {
        let next = self.state.on(event);
        if next != self.state {
            info!("broker connection: {} -> {}", self.state, next);
        }
        self.state = next;
        self.state_tx.send_replace(next);
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }
}

/// Handle for interacting with the BrokerSubscriber
#[derive(Clone)]
pub struct SubscriberHandle {
    sender: mpsc::Sender<SubscriberCommand>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl SubscriberHandle {
    /// Spawn a new broker subscriber feeding `sender`
    pub fn spawn(config: BrokerConfig, sender: IngestSender) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let actor = BrokerSubscriber::new(config, sender, cmd_rx, state_tx);
        tokio::spawn(async move {
            if let Err(e) = actor.run().await {
                error!("broker subscriber stopped: {}", e);
            }
        });

        Self {
            sender: cmd_tx,
            state_rx,
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Receiver that is notified on every state change
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Shutdown the broker subscriber
    pub async fn shutdown(&self) {
        let _ = self.sender.send(SubscriberCommand::Shutdown).await;
    }
}
