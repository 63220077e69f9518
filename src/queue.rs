//! Handoff queue between the broker subscriber and the processing cycle
//!
//! A thin wrapper around an unbounded tokio mpsc channel. The subscriber side
//! never blocks; the processing side drains whatever has arrived without
//! waiting.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};

/// A raw payload as it came off the wire, already trimmed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub payload: String,
    pub received_at: DateTime<Utc>,
}

impl RawMessage {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }
}

/// Producer side of the ingest queue
#[derive(Debug, Clone)]
pub struct IngestSender {
    sender: UnboundedSender<RawMessage>,
}

impl IngestSender {
    /// Enqueue a message. Returns `false` if the consumer is gone.
    pub fn push(&self, message: RawMessage) -> bool {
        self.sender.send(message).is_ok()
    }
}

/// Consumer side of the ingest queue
#[derive(Debug)]
pub struct IngestQueue {
    receiver: UnboundedReceiver<RawMessage>,
    closed: bool,
}

impl IngestQueue {
    pub fn new() -> (IngestSender, IngestQueue) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            IngestSender { sender },
            IngestQueue {
                receiver,
                closed: false,
            },
        )
    }

    /// Take everything currently queued, oldest first
    pub fn drain(&mut self) -> Vec<RawMessage> {
        let mut messages = Vec::with_capacity(self.receiver.len());
        loop {
            match self.receiver.try_recv() {
                Ok(message) => messages.push(message),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                    break;
                }
            }
        }
        messages
    }

    /// Number of messages waiting
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Whether every sender has been dropped and the queue ran dry
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
