//! `rumqttc` implementation of [`BrokerLink`]
//!
//! The event loop reconnects on its own once polled again after an error.
//! The link only paces those attempts with [`ReconnectConfig`] and reports
//! each fresh CONNACK so the session can decide whether to re-subscribe.
//! Credentials are fixed per connect; automatic reconnects reuse them.
//!
//! Decisions after each poll come from [`MessageHandler::pump_step`]; this
//! module does the I/O, logging and sleeping around them.

use super::connection::{configure_mqtt_options, ReconnectConfig};
use super::message_handler::{EventRoute, MessageHandler, PumpAction};
use crate::config::BrokerSection;
use crate::transport::{
    BrokerLink, ConnAckInfo, ConnectRequest, LinkEvent, SubscriptionFilter, TransportError,
};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, EventLoop, SubscribeFilter};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Time allowed for our DISCONNECT to reach the wire
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Request channel capacity between `AsyncClient` and `EventLoop`
const REQUEST_CAPACITY: usize = 10;

struct ActiveSession {
    client_id: String,
    client: AsyncClient,
    event_loop: EventLoop,
    reconnect_attempts: u32,
    /// Messages that arrived while a subscribe waited for its SUBACK
    pending: VecDeque<LinkEvent>,
}

/// Broker link over a `rumqttc` client and event loop
pub struct RumqttcLink {
    broker: BrokerSection,
    reconnect: ReconnectConfig,
    session: Option<ActiveSession>,
}

impl RumqttcLink {
    pub fn new(broker: BrokerSection, reconnect: ReconnectConfig) -> Self {
        Self {
            broker,
            reconnect,
            session: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }
}

fn connection_error(client_id: &str, error: ConnectionError) -> TransportError {
    match error {
        ConnectionError::ConnectionRefused(code) => TransportError::Refused {
            client_id: client_id.to_string(),
            code,
        },
        other => TransportError::Connection {
            client_id: client_id.to_string(),
            reason: other.to_string(),
        },
    }
}

/// Poll until the broker answers the CONNECT
async fn wait_for_connack(
    event_loop: &mut EventLoop,
    client_id: &str,
) -> Result<ConnAckInfo, TransportError> {
    loop {
        let event = event_loop
            .poll()
            .await
            .map_err(|e| connection_error(client_id, e))?;

        match MessageHandler::route_mqtt_event(&event) {
            EventRoute::ConnectionAcknowledged { session_present } => {
                return Ok(ConnAckInfo { session_present });
            }
            EventRoute::ConnectionRefused(code) => {
                return Err(TransportError::Refused {
                    client_id: client_id.to_string(),
                    code,
                });
            }
            route => debug!(target: "mqtt_transport", "pre-CONNACK event: {:?}", route),
        }
    }
}

/// Poll once and run the outcome through [`MessageHandler::pump_step`]
async fn pump_once(session: &mut ActiveSession, reconnect: &ReconnectConfig) -> PumpAction {
    let polled = match session.event_loop.poll().await {
        Ok(event) => Ok(MessageHandler::route_mqtt_event(&event)),
        Err(e) => Err(connection_error(&session.client_id, e)),
    };

    let previous = session.reconnect_attempts;
    let (action, attempts) =
        MessageHandler::pump_step(polled, previous, reconnect, &session.client_id);
    session.reconnect_attempts = attempts;

    match &action {
        PumpAction::Reconnected { session_present } => info!(
            client_id = %session.client_id,
            attempts = previous,
            session_present,
            "transport reconnected"
        ),
        PumpAction::Subscribed { packet_id } => {
            debug!(target: "mqtt_transport", packet_id, "subscription confirmed");
        }
        PumpAction::SubscribeRejected {
            packet_id,
            rejected,
        } => warn!(packet_id, rejected, "broker rejected topic filters"),
        PumpAction::BrokerDisconnected => {
            warn!(client_id = %session.client_id, "broker sent DISCONNECT");
        }
        PumpAction::Retry {
            attempt,
            delay_ms,
            failure,
        } => warn!(
            client_id = %session.client_id,
            code = ?failure.return_code(),
            "connection lost ({}), reconnecting attempt {} in {}ms",
            failure,
            attempt,
            delay_ms
        ),
        PumpAction::GiveUp { attempts, failure } => error!(
            client_id = %session.client_id,
            attempts,
            "giving up reconnecting: {}",
            failure
        ),
        PumpAction::Deliver(_) | PumpAction::Continue | PumpAction::Closed => {}
    }

    if let PumpAction::Retry { delay_ms, .. } = &action {
        tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
    }
    action
}

fn rejected_error(client_id: &str, rejected: usize) -> TransportError {
    TransportError::Request {
        client_id: client_id.to_string(),
        reason: format!("broker rejected {rejected} topic filter(s)"),
    }
}

/// Pump until the SUBACK for our SUBSCRIBE, buffering messages on the way
async fn wait_for_suback(
    session: &mut ActiveSession,
    reconnect: &ReconnectConfig,
) -> Result<(), TransportError> {
    loop {
        match pump_once(session, reconnect).await {
            PumpAction::Subscribed { .. } => return Ok(()),
            PumpAction::SubscribeRejected { rejected, .. } => {
                return Err(rejected_error(&session.client_id, rejected));
            }
            PumpAction::Deliver(message) => session.pending.push_back(LinkEvent::Message(message)),
            PumpAction::BrokerDisconnected | PumpAction::Continue => {}
            PumpAction::Retry { failure, .. } | PumpAction::GiveUp { failure, .. } => {
                return Err(failure);
            }
            PumpAction::Reconnected { .. } | PumpAction::Closed => {
                return Err(TransportError::Request {
                    client_id: session.client_id.clone(),
                    reason: "connection reset before SUBACK".to_string(),
                });
            }
        }
    }
}

/// Pump until something the session has to see
async fn pump_until_event(
    session: &mut ActiveSession,
    reconnect: &ReconnectConfig,
) -> Result<LinkEvent, TransportError> {
    loop {
        match pump_once(session, reconnect).await {
            PumpAction::Deliver(message) => return Ok(LinkEvent::Message(message)),
            PumpAction::Reconnected { session_present } => {
                return Ok(LinkEvent::Reconnected { session_present });
            }
            PumpAction::SubscribeRejected { rejected, .. } => {
                return Err(rejected_error(&session.client_id, rejected));
            }
            PumpAction::GiveUp { failure, .. } => return Err(failure),
            PumpAction::Closed => return Ok(LinkEvent::Closed),
            PumpAction::Subscribed { .. }
            | PumpAction::BrokerDisconnected
            | PumpAction::Continue
            | PumpAction::Retry { .. } => {}
        }
    }
}

#[async_trait]
impl BrokerLink for RumqttcLink {
    async fn connect(&mut self, request: ConnectRequest) -> Result<ConnAckInfo, TransportError> {
        // a new connect replaces whatever was open
        self.session = None;

        let mqtt_options = configure_mqtt_options(&request, &self.broker)?;
        let (client, mut event_loop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);

        let timeout_secs = self.broker.connack_timeout_secs;
        let ack = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            wait_for_connack(&mut event_loop, &request.client_id),
        )
        .await
        .map_err(|_| TransportError::ConnAckTimeout {
            client_id: request.client_id.clone(),
            timeout_secs,
        })??;

        self.session = Some(ActiveSession {
            client_id: request.client_id,
            client,
            event_loop,
            reconnect_attempts: 0,
            pending: VecDeque::new(),
        });
        Ok(ack)
    }

    /// Sends one SUBSCRIBE and waits for its SUBACK; any refused filter is
    /// an error. The session stays open so the caller can disconnect cleanly.
    async fn subscribe(&mut self, filters: Vec<SubscriptionFilter>) -> Result<(), TransportError> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| TransportError::NotConnected {
                client_id: String::new(),
            })?;
        let client = session.client.clone();
        let client_id = session.client_id.clone();

        let filters = filters
            .into_iter()
            .map(|filter| SubscribeFilter::new(filter.topic, filter.qos));
        client
            .subscribe_many(filters)
            .await
            .map_err(|e| TransportError::Request {
                client_id: client_id.clone(),
                reason: e.to_string(),
            })?;

        let timeout_secs = self.broker.connack_timeout_secs;
        tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            wait_for_suback(session, &self.reconnect),
        )
        .await
        .map_err(|_| TransportError::Request {
            client_id,
            reason: format!("no SUBACK within {timeout_secs}s"),
        })?
    }

    /// A failure that ends the pump, or our own DISCONNECT, drops the
    /// session so a later `disconnect` does not poll the event loop again.
    async fn next_event(&mut self) -> Result<LinkEvent, TransportError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(LinkEvent::Closed);
        };
        if let Some(event) = session.pending.pop_front() {
            return Ok(event);
        }

        let outcome = pump_until_event(session, &self.reconnect).await;
        if matches!(outcome, Ok(LinkEvent::Closed) | Err(_)) {
            self.session = None;
        }
        outcome
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };

        session
            .client
            .try_disconnect()
            .map_err(|e| TransportError::Request {
                client_id: session.client_id.clone(),
                reason: e.to_string(),
            })?;

        let drain = async {
            loop {
                match session.event_loop.poll().await {
                    Ok(event) => {
                        if MessageHandler::route_mqtt_event(&event) == EventRoute::DisconnectSent {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        };
        if tokio::time::timeout(DISCONNECT_GRACE, drain).await.is_err() {
            warn!(client_id = %session.client_id, "DISCONNECT not flushed in time, dropping connection");
        }

        info!(client_id = %session.client_id, "MQTT link closed");
        Ok(())
    }
}
