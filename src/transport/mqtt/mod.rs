//! MQTT 3.1.1 transport over `rumqttc`
//!
//! - [`connection`] - pure option building, backoff and topic construction
//! - [`message_handler`] - pure routing of event loop events
//! - [`link`] - the I/O side: connect, subscribe, event pump, disconnect

pub mod connection;
pub mod link;
pub mod message_handler;

pub use connection::{
    configure_mqtt_options, parse_broker_address, ReconnectConfig, ReconnectionDecision,
    TopicBuilder,
};
pub use link::RumqttcLink;
pub use message_handler::{EventRoute, MessageHandler, PumpAction};
