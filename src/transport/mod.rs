//! Transport layer between the session and the broker
//!
//! [`BrokerLink`] is the seam over the MQTT/TLS stack. The production
//! implementation is [`mqtt::RumqttcLink`]; tests drive the session with
//! `testing::MockLink`.

use bytes::Bytes;
use rumqttc::{ConnectReturnCode, QoS};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub mod mqtt;
pub mod trust_anchor;

/// MQTT 3.1.1 protocol level, pinned for the target broker
pub const MQTT_V311_PROTOCOL_LEVEL: u8 = 4;

/// Everything the link needs to open one broker session
#[derive(Clone, PartialEq)]
pub struct ConnectRequest {
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub ca_path: PathBuf,
    pub clean_session: bool,
    pub protocol_level: u8,
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &"***")
            .field("ca_path", &self.ca_path)
            .field("clean_session", &self.clean_session)
            .field("protocol_level", &self.protocol_level)
            .finish()
    }
}

/// Broker acknowledgement of a successful connect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAckInfo {
    pub session_present: bool,
}

/// One topic filter to subscribe to
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionFilter {
    pub topic: String,
    pub qos: QoS,
}

impl SubscriptionFilter {
    pub fn at_most_once(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            qos: QoS::AtMostOnce,
        }
    }
}

/// An inbound application message
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// What the link hands back from [`BrokerLink::next_event`]
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// An application message arrived
    Message(InboundMessage),
    /// The transport re-established the connection on its own
    Reconnected { session_present: bool },
    /// The connection is gone for good
    Closed,
}

/// Transport failures, carrying the client id and broker return code where known
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("broker refused connection [client id = {client_id}, code = {code:?}]")]
    Refused {
        client_id: String,
        code: ConnectReturnCode,
    },
    #[error("connection failed [client id = {client_id}, error = {reason}]")]
    Connection { client_id: String, reason: String },
    #[error("no CONNACK within {timeout_secs}s [client id = {client_id}]")]
    ConnAckTimeout { client_id: String, timeout_secs: u64 },
    #[error("request failed [client id = {client_id}, error = {reason}]")]
    Request { client_id: String, reason: String },
    #[error("client '{client_id}' is not connected")]
    NotConnected { client_id: String },
    #[error("invalid transport configuration: {0}")]
    Config(String),
}

impl TransportError {
    pub fn client_id(&self) -> Option<&str> {
        match self {
            TransportError::Refused { client_id, .. }
            | TransportError::Connection { client_id, .. }
            | TransportError::ConnAckTimeout { client_id, .. }
            | TransportError::Request { client_id, .. }
            | TransportError::NotConnected { client_id } => Some(client_id),
            TransportError::Config(_) => None,
        }
    }

    /// Broker-native CONNACK return code, if the broker answered
    pub fn return_code(&self) -> Option<ConnectReturnCode> {
        match self {
            TransportError::Refused { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Connection to the broker, owned by a single session
///
/// Calls are serialized by `&mut self`; the link is not shared across tasks.
#[async_trait::async_trait]
pub trait BrokerLink: Send {
    /// Open the connection and wait for the broker's CONNACK
    async fn connect(&mut self, request: ConnectRequest) -> Result<ConnAckInfo, TransportError>;

    /// Issue one SUBSCRIBE carrying all filters
    async fn subscribe(&mut self, filters: Vec<SubscriptionFilter>) -> Result<(), TransportError>;

    /// Wait for the next event with no timeout
    ///
    /// Must be cancel safe: dropping the future may not lose a message that
    /// was already handed out.
    async fn next_event(&mut self) -> Result<LinkEvent, TransportError>;

    /// Best-effort teardown; calling it on a closed link is a no-op
    async fn disconnect(&mut self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_request_debug_hides_password() {
        let request = ConnectRequest {
            client_id: "dev-01".to_string(),
            username: "abc".to_string(),
            password: "version=2018-10-31&sign=xyz".to_string(),
            ca_path: PathBuf::from("/dev/shm/onenet_ca_1"),
            clean_session: false,
            protocol_level: MQTT_V311_PROTOCOL_LEVEL,
        };
        let rendered = format!("{request:?}");
        assert!(!rendered.contains("sign=xyz"));
        assert!(rendered.contains("dev-01"));
    }

    #[test]
    fn test_transport_error_carries_client_id_and_code() {
        let error = TransportError::Refused {
            client_id: "dev-01".to_string(),
            code: ConnectReturnCode::BadUserNamePassword,
        };
        assert_eq!(error.client_id(), Some("dev-01"));
        assert_eq!(
            error.return_code(),
            Some(ConnectReturnCode::BadUserNamePassword)
        );
        assert!(error.to_string().contains("client id = dev-01"));

        let config = TransportError::Config("bad url".to_string());
        assert_eq!(config.client_id(), None);
        assert_eq!(config.return_code(), None);
    }

    #[test]
    fn test_inbound_message_lossy_payload() {
        let message = InboundMessage::new("t", b"{\"id\":\"1\"}".to_vec());
        assert_eq!(message.payload_lossy(), "{\"id\":\"1\"}");
    }
}
