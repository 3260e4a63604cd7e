//! Consumers of inbound messages
//!
//! Payload interpretation (property set/get and friends) lives outside the
//! session; the receive loop hands each message to an [`InboundHandler`].

use crate::transport::InboundMessage;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub trait InboundHandler: Send {
    fn handle(&mut self, message: InboundMessage);
}

impl<F> InboundHandler for F
where
    F: FnMut(InboundMessage) + Send,
{
    fn handle(&mut self, message: InboundMessage) {
        self(message)
    }
}

/// Logs topic and payload of every message
#[derive(Debug, Default)]
pub struct LoggingHandler;

impl InboundHandler for LoggingHandler {
    fn handle(&mut self, message: InboundMessage) {
        info!(
            topic = %message.topic,
            "receive message, payload = {}",
            message.payload_lossy()
        );
    }
}

/// Forwards messages into a bounded channel, dropping them when it is full
#[derive(Debug, Clone)]
pub struct ForwardingHandler {
    sender: mpsc::Sender<InboundMessage>,
}

impl ForwardingHandler {
    pub fn new(sender: mpsc::Sender<InboundMessage>) -> Self {
        Self { sender }
    }
}

impl InboundHandler for ForwardingHandler {
    fn handle(&mut self, message: InboundMessage) {
        if let Err(e) = self.sender.try_send(message) {
            let topic = match &e {
                mpsc::error::TrySendError::Full(m) | mpsc::error::TrySendError::Closed(m) => {
                    m.topic.clone()
                }
            };
            warn!(topic = %topic, "dropping inbound message: {}", e);
        }
    }
}
