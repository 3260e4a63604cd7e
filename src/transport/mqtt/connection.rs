//! Pure connection configuration for the MQTT link
//!
//! This module contains pure functions for building `rumqttc` options,
//! reconnection backoff, and topic construction.

use crate::config::BrokerSection;
use crate::transport::{
    ConnectRequest, SubscriptionFilter, TransportError, MQTT_V311_PROTOCOL_LEVEL,
};
use rumqttc::{MqttOptions, Transport as RumqttcTransport};
use std::time::Duration;
use tracing::warn;
use url::Url;

/// Reconnection configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Maximum number of consecutive reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Backoff pattern in milliseconds
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_pattern: vec![250, 500, 1000, 5000],
            sustained_delay: 5000,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay for the given 1-based attempt
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = (attempt.saturating_sub(1)) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }

    /// Decide whether another attempt may follow `current_attempts` failures
    pub fn decide(&self, current_attempts: u32) -> ReconnectionDecision {
        if let Some(max_attempts) = self.max_attempts {
            if current_attempts >= max_attempts {
                return ReconnectionDecision::AbortMaxAttemptsExceeded;
            }
        }

        let attempt = current_attempts + 1;
        ReconnectionDecision::Proceed {
            attempt,
            delay_ms: self.calculate_backoff_delay(attempt),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == Some(0) {
            return Err("max_attempts must be greater than 0 or None for unlimited".to_string());
        }
        if self.sustained_delay == 0 {
            return Err("sustained_delay must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    Proceed { attempt: u32, delay_ms: u64 },
    AbortMaxAttemptsExceeded,
}

/// Host, port and whether TLS is on, from the broker URL
pub fn parse_broker_address(broker_url: &str) -> Result<(String, u16, bool), TransportError> {
    let url = Url::parse(broker_url)
        .map_err(|_| TransportError::Config(format!("invalid broker URL: {broker_url}")))?;

    let tls = match url.scheme() {
        "mqtts" | "ssl" => true,
        "mqtt" | "tcp" => false,
        other => {
            return Err(TransportError::Config(format!(
                "unsupported broker scheme '{other}'"
            )))
        }
    };
    let host = url
        .host_str()
        .ok_or_else(|| TransportError::Config(format!("missing host in {broker_url}")))?;
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok((host.to_string(), port, tls))
}

/// Build `rumqttc` options for one connect request
///
/// Reads the CA file named by the request. MQTT 3.1.1 is the only accepted
/// protocol level. Plaintext URLs need `allow_plaintext`.
pub fn configure_mqtt_options(
    request: &ConnectRequest,
    broker: &BrokerSection,
) -> Result<MqttOptions, TransportError> {
    if request.protocol_level != MQTT_V311_PROTOCOL_LEVEL {
        return Err(TransportError::Config(format!(
            "unsupported MQTT protocol level {}, broker requires 3.1.1",
            request.protocol_level
        )));
    }
    if request.client_id.trim().is_empty() || request.client_id.starts_with(' ') {
        return Err(TransportError::Config(format!(
            "invalid client id '{}'",
            request.client_id
        )));
    }

    let (host, port, tls) = parse_broker_address(&broker.url)?;
    if !tls {
        if !broker.allow_plaintext {
            return Err(TransportError::Config(format!(
                "{} is not TLS and plaintext is not allowed",
                broker.url
            )));
        }
        warn!(client_id = %request.client_id, "connecting without TLS, the access token is sent unencrypted");
    }

    let mut mqtt_options = MqttOptions::new(request.client_id.clone(), host, port);
    mqtt_options.set_credentials(request.username.clone(), request.password.clone());
    mqtt_options.set_clean_session(request.clean_session);
    mqtt_options.set_keep_alive(Duration::from_secs(broker.keep_alive_secs));

    if tls {
        let ca = std::fs::read(&request.ca_path).map_err(|e| {
            TransportError::Config(format!(
                "failed to read CA file {}: {e}",
                request.ca_path.display()
            ))
        })?;
        mqtt_options.set_transport(RumqttcTransport::tls(ca, None, None));
    }

    Ok(mqtt_options)
}

/// Topic construction under `$sys/{product_id}/{device_name}/thing/`
#[derive(Debug, Clone, PartialEq)]
pub struct TopicBuilder {
    prefix: String,
}

impl TopicBuilder {
    pub fn new(product_id: &str, device_name: &str) -> Self {
        Self {
            prefix: format!("$sys/{product_id}/{device_name}/thing"),
        }
    }

    fn topic(&self, suffix: &str) -> String {
        format!("{}/{suffix}", self.prefix)
    }

    pub fn property_post(&self) -> String {
        self.topic("property/post")
    }

    pub fn property_post_reply(&self) -> String {
        self.topic("property/post/reply")
    }

    pub fn property_set(&self) -> String {
        self.topic("property/set")
    }

    pub fn property_desired_get_reply(&self) -> String {
        self.topic("property/desired/get/reply")
    }

    pub fn property_desired_delete_reply(&self) -> String {
        self.topic("property/desired/delete/reply")
    }

    pub fn property_get(&self) -> String {
        self.topic("property/get")
    }

    pub fn event_post_reply(&self) -> String {
        self.topic("event/post/reply")
    }

    pub fn sub_property_get(&self) -> String {
        self.topic("sub/property/get")
    }

    pub fn sub_property_set(&self) -> String {
        self.topic("sub/property/set")
    }

    /// The fixed filter set a fresh session subscribes to, all at QoS 0
    pub fn subscription_filters(&self) -> Vec<SubscriptionFilter> {
        [
            self.property_post_reply(),
            self.property_set(),
            self.property_desired_get_reply(),
            self.property_desired_delete_reply(),
            self.property_get(),
            self.event_post_reply(),
            self.sub_property_get(),
            self.sub_property_set(),
        ]
        .into_iter()
        .map(SubscriptionFilter::at_most_once)
        .collect()
    }
}
