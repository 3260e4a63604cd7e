//! OneNET device client
//!
//! Connects a device to the OneNET MQTT broker over TLS, authenticating with
//! an HMAC-signed access token, and receives the device's thing-model
//! topics.
//!
//! # Overview
//!
//! - [`auth`] - credentials and access token construction
//! - [`transport`] - the broker link seam, CA provisioning and the `rumqttc` link
//! - [`session`] - connect/subscribe/receive/disconnect lifecycle
//! - [`config`] - TOML configuration
//! - [`observability`] - structured logging
//!
//! # Quick Start
//!
//! ```rust
//! use onenet_device::auth::{AuthScope, Credential, EncodedSecret, TokenBuilder};
//! use chrono::{TimeZone, Utc};
//!
//! let credential = Credential::new(
//!     "abc",
//!     EncodedSecret::new("c2VjcmV0LWtleQ=="),
//!     "dev-01",
//!     EncodedSecret::new("c2VjcmV0LWtleQ=="),
//!     AuthScope::Product,
//! );
//! let now = Utc.timestamp_opt(1_861_920_000, 0).unwrap();
//! let token = TokenBuilder::default().build(&credential, now).unwrap();
//!
//! assert_eq!(
//!     token.as_password(),
//!     "version=2018-10-31&res=products%2Fabc&et=1893456000&method=sha1&sign=4qC9LeZ%2FYuhlML8UTCF24kuWXoA%3D"
//! );
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod observability;
pub mod session;
pub mod testing;
pub mod transport;

pub use auth::{AccessToken, AuthScope, Credential, EncodedSecret, TokenBuilder, TokenError};
pub use config::{ClientConfig, ConfigError};
pub use error::{ClientError, ClientResult};
pub use session::{InboundHandler, LoggingHandler, SessionManager, SessionState};
pub use transport::mqtt::RumqttcLink;
pub use transport::BrokerLink;
