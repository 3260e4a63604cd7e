//! Mock broker link
//!
//! [`MockLink`] records every request it receives and replays scripted
//! connect outcomes. Events are fed through a [`MockLinkHandle`]; until one
//! arrives `next_event` stays pending, like a quiet broker.

use crate::transport::{
    BrokerLink, ConnAckInfo, ConnectRequest, InboundMessage, LinkEvent, SubscriptionFilter,
    TransportError,
};
use async_trait::async_trait;
use rumqttc::ConnectReturnCode;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

type EventResult = Result<LinkEvent, TransportError>;

#[derive(Debug, Default)]
struct Recorded {
    connect_requests: Vec<ConnectRequest>,
    subscribe_calls: Vec<Vec<SubscriptionFilter>>,
    disconnect_calls: usize,
    connect_outcomes: VecDeque<Result<ConnAckInfo, TransportError>>,
    fail_subscribe: bool,
}

/// In-memory [`BrokerLink`]
#[derive(Debug)]
pub struct MockLink {
    recorded: Arc<Mutex<Recorded>>,
    events: mpsc::UnboundedReceiver<EventResult>,
    connected: bool,
    client_id: String,
}

/// Test-side control of a [`MockLink`]
#[derive(Debug, Clone)]
pub struct MockLinkHandle {
    recorded: Arc<Mutex<Recorded>>,
    events: mpsc::UnboundedSender<EventResult>,
}

impl MockLink {
    pub fn new() -> (Self, MockLinkHandle) {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                recorded: recorded.clone(),
                events: rx,
                connected: false,
                client_id: String::new(),
            },
            MockLinkHandle {
                recorded,
                events: tx,
            },
        )
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn recorded(&self) -> MutexGuard<'_, Recorded> {
        lock(&self.recorded)
    }

    fn not_connected(&self) -> TransportError {
        TransportError::NotConnected {
            client_id: self.client_id.clone(),
        }
    }
}

fn lock(recorded: &Mutex<Recorded>) -> MutexGuard<'_, Recorded> {
    recorded.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl BrokerLink for MockLink {
    async fn connect(&mut self, request: ConnectRequest) -> Result<ConnAckInfo, TransportError> {
        self.client_id = request.client_id.clone();
        let outcome = {
            let mut recorded = self.recorded();
            recorded.connect_requests.push(request);
            recorded
                .connect_outcomes
                .pop_front()
                .unwrap_or(Ok(ConnAckInfo {
                    session_present: false,
                }))
        };
        self.connected = outcome.is_ok();
        outcome
    }

    async fn subscribe(&mut self, filters: Vec<SubscriptionFilter>) -> Result<(), TransportError> {
        if !self.connected {
            return Err(self.not_connected());
        }
        let mut recorded = self.recorded();
        recorded.subscribe_calls.push(filters);
        if recorded.fail_subscribe {
            return Err(TransportError::Request {
                client_id: self.client_id.clone(),
                reason: "subscribe rejected by mock".to_string(),
            });
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Result<LinkEvent, TransportError> {
        if !self.connected {
            return Err(self.not_connected());
        }
        match self.events.recv().await {
            Some(Ok(LinkEvent::Closed)) | None => {
                self.connected = false;
                Ok(LinkEvent::Closed)
            }
            Some(event) => event,
        }
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.recorded().disconnect_calls += 1;
        self.connected = false;
        Ok(())
    }
}

impl MockLinkHandle {
    /// Queue the outcome of the next `connect` call
    pub fn script_connect(&self, outcome: Result<ConnAckInfo, TransportError>) {
        lock(&self.recorded).connect_outcomes.push_back(outcome);
    }

    /// Next `connect` succeeds with the given session-present flag
    pub fn accept_with_session(&self, session_present: bool) {
        self.script_connect(Ok(ConnAckInfo { session_present }));
    }

    /// Next `connect` is refused with `code`
    pub fn refuse(&self, client_id: &str, code: ConnectReturnCode) {
        self.script_connect(Err(TransportError::Refused {
            client_id: client_id.to_string(),
            code,
        }));
    }

    pub fn fail_subscribe(&self) {
        lock(&self.recorded).fail_subscribe = true;
    }

    pub fn push_event(&self, event: EventResult) {
        // Receiver gone means the link was dropped; nothing left to feed
        let _ = self.events.send(event);
    }

    pub fn push_message(&self, topic: &str, payload: &[u8]) {
        self.push_event(Ok(LinkEvent::Message(InboundMessage::new(
            topic,
            payload.to_vec(),
        ))));
    }

    pub fn push_reconnect(&self, session_present: bool) {
        self.push_event(Ok(LinkEvent::Reconnected { session_present }));
    }

    pub fn close(&self) {
        self.push_event(Ok(LinkEvent::Closed));
    }

    pub fn connect_requests(&self) -> Vec<ConnectRequest> {
        lock(&self.recorded).connect_requests.clone()
    }

    pub fn subscribe_calls(&self) -> Vec<Vec<SubscriptionFilter>> {
        lock(&self.recorded).subscribe_calls.clone()
    }

    pub fn disconnect_count(&self) -> usize {
        lock(&self.recorded).disconnect_calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MQTT_V311_PROTOCOL_LEVEL;
    use std::path::PathBuf;

    fn request() -> ConnectRequest {
        ConnectRequest {
            client_id: "dev-01".to_string(),
            username: "abc".to_string(),
            password: "token".to_string(),
            ca_path: PathBuf::from("/dev/shm/onenet_ca_1"),
            clean_session: false,
            protocol_level: MQTT_V311_PROTOCOL_LEVEL,
        }
    }

    #[tokio::test]
    async fn test_default_connect_is_fresh_session() {
        let (mut link, handle) = MockLink::new();
        let ack = link.connect(request()).await.unwrap();

        assert!(!ack.session_present);
        assert!(link.is_connected());
        assert_eq!(handle.connect_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_scripted_refusal() {
        let (mut link, handle) = MockLink::new();
        handle.refuse("dev-01", ConnectReturnCode::BadUserNamePassword);

        let err = link.connect(request()).await.unwrap_err();
        assert_eq!(
            err.return_code(),
            Some(ConnectReturnCode::BadUserNamePassword)
        );
        assert!(!link.is_connected());
        assert!(link.subscribe(Vec::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_events_are_replayed_in_order() {
        let (mut link, handle) = MockLink::new();
        link.connect(request()).await.unwrap();

        handle.push_message("a", b"1");
        handle.close();

        assert!(matches!(
            link.next_event().await.unwrap(),
            LinkEvent::Message(_)
        ));
        assert_eq!(link.next_event().await.unwrap(), LinkEvent::Closed);
        assert!(!link.is_connected());
    }
}
