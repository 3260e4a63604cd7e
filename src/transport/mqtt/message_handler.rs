//! Pure routing of `rumqttc` events
//!
//! The link turns each event into an [`EventRoute`], then [`MessageHandler::pump_step`]
//! decides what to do with it, which keeps the decision logic testable
//! without a broker.

use super::connection::{ReconnectConfig, ReconnectionDecision};
use crate::transport::{InboundMessage, TransportError};
use rumqttc::{ConnectReturnCode, Event, Outgoing, Packet, SubscribeReasonCode};

/// Routing decision for one event loop event
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// CONNACK accepted by the broker
    ConnectionAcknowledged { session_present: bool },
    /// CONNACK with a non-success return code
    ConnectionRefused(ConnectReturnCode),
    /// Application message
    MessageReceived { topic: String, payload: bytes::Bytes },
    /// SUBACK; `rejected` counts filters the broker refused
    SubscriptionConfirmed { packet_id: u16, rejected: usize },
    /// Broker-initiated DISCONNECT
    Disconnected,
    /// Our own DISCONNECT has been written
    DisconnectSent,
    /// Pings, acks and other outgoing traffic
    Infrastructure,
}

/// What the event pump does after one poll
#[derive(Debug)]
pub enum PumpAction {
    /// Hand the message to the caller
    Deliver(InboundMessage),
    /// The event loop reconnected and got a CONNACK
    Reconnected { session_present: bool },
    /// SUBACK granting every filter
    Subscribed { packet_id: u16 },
    /// SUBACK refusing at least one filter
    SubscribeRejected { packet_id: u16, rejected: usize },
    /// Broker sent DISCONNECT; the next poll fails and reconnects
    BrokerDisconnected,
    /// Nothing for the caller
    Continue,
    /// Wait `delay_ms`, then poll again so the event loop reconnects
    Retry {
        attempt: u32,
        delay_ms: u64,
        failure: TransportError,
    },
    /// Reconnect budget spent
    GiveUp { attempts: u32, failure: TransportError },
    /// Our DISCONNECT went out; the link is done
    Closed,
}

pub struct MessageHandler;

impl MessageHandler {
    /// Route an MQTT event (pure)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(ack) if ack.code == ConnectReturnCode::Success => {
                    EventRoute::ConnectionAcknowledged {
                        session_present: ack.session_present,
                    }
                }
                Packet::ConnAck(ack) => EventRoute::ConnectionRefused(ack.code),
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: publish.topic.clone(),
                    payload: publish.payload.clone(),
                },
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    rejected: suback
                        .return_codes
                        .iter()
                        .filter(|code| matches!(code, SubscribeReasonCode::Failure))
                        .count(),
                },
                Packet::Disconnect => EventRoute::Disconnected,
                _ => EventRoute::Infrastructure,
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::Infrastructure,
        }
    }

    /// Decide the next pump action from one poll outcome (pure)
    ///
    /// Returns the action and the updated count of consecutive failed
    /// attempts: a fresh CONNACK resets it, each failure that may be retried
    /// bumps it.
    pub fn pump_step(
        polled: Result<EventRoute, TransportError>,
        attempts: u32,
        reconnect: &ReconnectConfig,
        client_id: &str,
    ) -> (PumpAction, u32) {
        let failure = match polled {
            Ok(EventRoute::MessageReceived { topic, payload }) => {
                return (PumpAction::Deliver(InboundMessage { topic, payload }), attempts);
            }
            Ok(EventRoute::ConnectionAcknowledged { session_present }) => {
                return (PumpAction::Reconnected { session_present }, 0);
            }
            Ok(EventRoute::SubscriptionConfirmed {
                packet_id,
                rejected: 0,
            }) => return (PumpAction::Subscribed { packet_id }, attempts),
            Ok(EventRoute::SubscriptionConfirmed {
                packet_id,
                rejected,
            }) => {
                return (
                    PumpAction::SubscribeRejected {
                        packet_id,
                        rejected,
                    },
                    attempts,
                );
            }
            Ok(EventRoute::Disconnected) => return (PumpAction::BrokerDisconnected, attempts),
            Ok(EventRoute::DisconnectSent) => return (PumpAction::Closed, attempts),
            Ok(EventRoute::Infrastructure) => return (PumpAction::Continue, attempts),
            Ok(EventRoute::ConnectionRefused(code)) => TransportError::Refused {
                client_id: client_id.to_string(),
                code,
            },
            Err(failure) => failure,
        };

        match reconnect.decide(attempts) {
            ReconnectionDecision::Proceed { attempt, delay_ms } => (
                PumpAction::Retry {
                    attempt,
                    delay_ms,
                    failure,
                },
                attempt,
            ),
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                (PumpAction::GiveUp { attempts, failure }, attempts)
            }
        }
    }
}
