//! Broker session lifecycle
//!
//! [`SessionManager`] owns one [`BrokerLink`] and drives it through
//! connect, subscribe, receive and disconnect. Every connect provisions a
//! fresh CA file and builds a fresh token before any network I/O, so setup
//! failures never reach the broker.

use super::handler::InboundHandler;
use super::state::{log_state_transition, SessionEvent, SessionState};
use crate::auth::{AccessToken, Credential, TokenBuilder};
use crate::config::{ClientConfig, ConfigError};
use crate::error::{ClientError, ClientResult};
use crate::transport::mqtt::TopicBuilder;
use crate::transport::trust_anchor::{CaProvisioner, ProvisionError, ONENET_CA_CERT};
use crate::transport::{BrokerLink, ConnectRequest, LinkEvent, MQTT_V311_PROTOCOL_LEVEL};
use crate::{session_span, token_span};
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

pub struct SessionManager<L: BrokerLink> {
    credential: Credential,
    client_id: String,
    token_builder: TokenBuilder,
    provisioner: CaProvisioner,
    trust_anchor: String,
    topics: TopicBuilder,
    link: L,
    state_tx: watch::Sender<SessionState>,
    token: Option<AccessToken>,
}

impl<L: BrokerLink> SessionManager<L> {
    /// Session with default token settings and the compiled-in trust anchor.
    /// The client id is the device name.
    pub fn new(credential: Credential, link: L) -> Self {
        let topics = TopicBuilder::new(credential.product_id(), credential.device_name());
        let client_id = credential.device_name().to_string();
        let (state_tx, _) = watch::channel(SessionState::Disconnected);

        Self {
            credential,
            client_id,
            token_builder: TokenBuilder::default(),
            provisioner: CaProvisioner::default(),
            trust_anchor: ONENET_CA_CERT.to_string(),
            topics,
            link,
            state_tx,
            token: None,
        }
    }

    /// Session configured from a loaded [`ClientConfig`]
    ///
    /// Validates the configuration and reads `tls.ca_file` when set, so bad
    /// values fail here rather than at connect time.
    pub fn from_config(
        credential: Credential,
        config: &ClientConfig,
        link: L,
    ) -> ClientResult<Self> {
        config.validate()?;
        let validity = chrono::Duration::try_seconds(config.token.validity_secs).ok_or_else(|| {
            ConfigError::InvalidConfig(format!(
                "token validity_secs {} out of range",
                config.token.validity_secs
            ))
        })?;
        let token_builder =
            TokenBuilder::new(validity).with_version(config.token.version.clone());

        let mut session = Self::new(credential, link)
            .with_token_builder(token_builder)
            .with_provisioner(CaProvisioner::new(config.tls.ca_dir.clone()));

        if let Some(client_id) = &config.broker.client_id {
            session = session.with_client_id(client_id.clone());
        }
        if let Some(path) = &config.tls.ca_file {
            let pem = std::fs::read_to_string(path).map_err(|source| ProvisionError::Io {
                path: path.clone(),
                source,
            })?;
            session = session.with_trust_anchor(pem);
        }

        Ok(session)
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_token_builder(mut self, builder: TokenBuilder) -> Self {
        self.token_builder = builder;
        self
    }

    pub fn with_provisioner(mut self, provisioner: CaProvisioner) -> Self {
        self.provisioner = provisioner;
        self
    }

    /// Replace the compiled-in CA certificate (PEM)
    pub fn with_trust_anchor(mut self, pem: impl Into<String>) -> Self {
        self.trust_anchor = pem.into();
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn topics(&self) -> &TopicBuilder {
        &self.topics
    }

    pub fn state(&self) -> SessionState {
        self.state_tx.borrow().clone()
    }

    /// Subscribe to state changes
    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Token used for the current session, if connected
    pub fn token(&self) -> Option<&AccessToken> {
        self.token.as_ref()
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    /// Connect, then subscribe unless the broker kept our session.
    ///
    /// Returns the broker's session-present flag.
    pub async fn connect(&mut self) -> ClientResult<bool> {
        let span = session_span!(
            client_id = %self.client_id,
            product_id = %self.credential.product_id()
        );
        self.connect_inner().instrument(span).await
    }

    async fn connect_inner(&mut self) -> ClientResult<bool> {
        let current = self.state();
        if current.next(&SessionEvent::ConnectStarted).is_none() {
            return Err(ClientError::invalid_state("connect", current));
        }
        self.apply(SessionEvent::ConnectStarted);
        info!("start connecting to broker");

        let ca_path = match self.provisioner.materialize(&self.trust_anchor) {
            Ok(path) => path,
            Err(e) => return Err(self.fail(e.into())),
        };

        let token = {
            let _guard = token_span!(scope = %self.credential.auth_scope()).entered();
            self.token_builder.build(&self.credential, Utc::now())
        };
        let token = match token {
            Ok(token) => token,
            Err(e) => return Err(self.fail(e.into())),
        };

        let request = ConnectRequest {
            client_id: self.client_id.clone(),
            username: self.credential.product_id().to_string(),
            password: token.as_password().to_string(),
            ca_path,
            clean_session: false,
            protocol_level: MQTT_V311_PROTOCOL_LEVEL,
        };

        let ack = match self.link.connect(request).await {
            Ok(ack) => ack,
            Err(e) => {
                error!(
                    client_id = %self.client_id,
                    code = ?e.return_code(),
                    "failed to connect: {}", e
                );
                return Err(self.fail(e.into()));
            }
        };

        self.token = Some(token);
        self.apply(SessionEvent::ConnAckReceived {
            session_present: ack.session_present,
        });

        if let Err(e) = self.ensure_subscribed(ack.session_present).await {
            if let Err(teardown) = self.link.disconnect().await {
                warn!("teardown after failed subscribe: {}", teardown);
            }
            self.token = None;
            return Err(self.fail(e));
        }

        Ok(ack.session_present)
    }

    async fn ensure_subscribed(&mut self, session_present: bool) -> ClientResult<()> {
        if session_present {
            info!("session present, skip subscribing");
            return Ok(());
        }

        let filters = self.topics.subscription_filters();
        let count = filters.len();
        info!(count, "subscribing to device topics");
        self.link.subscribe(filters).await?;
        info!(count, "subscribe topics success");
        Ok(())
    }

    /// Receive until `cancel` fires or the connection is lost for good.
    ///
    /// Messages are handed to `handler` in arrival order. Cancellation
    /// disconnects the session; a transport failure leaves it `Failed` and
    /// is returned.
    pub async fn run<H: InboundHandler>(
        &mut self,
        cancel: CancellationToken,
        handler: &mut H,
    ) -> ClientResult<()> {
        let span = session_span!(client_id = %self.client_id);
        self.run_inner(cancel, handler).instrument(span).await
    }

    async fn run_inner<H: InboundHandler>(
        &mut self,
        cancel: CancellationToken,
        handler: &mut H,
    ) -> ClientResult<()> {
        let current = self.state();
        if current.next(&SessionEvent::ReceiveStarted).is_none() {
            return Err(ClientError::invalid_state("receive", current));
        }
        self.apply(SessionEvent::ReceiveStarted);
        info!("receive loop started");

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("shutdown requested, leaving receive loop");
                    break;
                }
                event = self.link.next_event() => event,
            };

            match event {
                Ok(LinkEvent::Message(message)) => {
                    debug!(topic = %message.topic, bytes = message.payload.len(), "message received");
                    handler.handle(message);
                }
                Ok(LinkEvent::Reconnected { session_present }) => {
                    self.on_reconnected(session_present).await?;
                }
                Ok(LinkEvent::Closed) => {
                    warn!("connection closed by transport");
                    break;
                }
                Err(e) => {
                    if self.token_expired() {
                        error!("connection lost with an expired access token: {}", e);
                    } else {
                        error!("connection lost: {}", e);
                    }
                    self.token = None;
                    return Err(self.fail(e.into()));
                }
            }
        }

        self.disconnect().await
    }

    async fn on_reconnected(&mut self, session_present: bool) -> ClientResult<()> {
        info!(session_present, "transport reconnected");
        if self.token_expired() {
            warn!(
                expires_at = ?self.token.as_ref().and_then(AccessToken::expires_at),
                "reconnected with an expired access token; it is not rebuilt on automatic reconnects"
            );
        }
        if let Err(e) = self.ensure_subscribed(session_present).await {
            self.token = None;
            return Err(self.fail(e));
        }
        Ok(())
    }

    /// Whether the token of the current session has passed its expiry
    pub fn token_expired(&self) -> bool {
        self.token
            .as_ref()
            .is_some_and(|token| token.is_expired_at(Utc::now()))
    }

    /// Close the session. Safe to call any number of times.
    pub async fn disconnect(&mut self) -> ClientResult<()> {
        if self.state() == SessionState::Disconnected {
            debug!("already disconnected");
            return Ok(());
        }

        if let Err(e) = self.link.disconnect().await {
            warn!("error during disconnect: {}", e);
        }
        self.token = None;
        self.apply(SessionEvent::Closed);
        info!(client_id = %self.client_id, "disconnected");
        Ok(())
    }

    /// Property upload. Publishing is not implemented; the call only checks
    /// the session is up and logs what would be sent.
    pub fn upload_properties(
        &self,
        properties: &BTreeMap<String, serde_json::Value>,
    ) -> ClientResult<()> {
        let current = self.state();
        if !current.is_connected() {
            return Err(ClientError::invalid_state("upload properties", current));
        }
        info!(
            topic = %self.topics.property_post(),
            count = properties.len(),
            "property upload requested, not published"
        );
        Ok(())
    }

    fn apply(&self, event: SessionEvent) {
        let current = self.state();
        match current.next(&event) {
            Some(next) => {
                log_state_transition(&current, &next);
                self.state_tx.send_replace(next);
            }
            None => debug!(state = current.label(), ?event, "ignored state event"),
        }
    }

    fn fail(&self, error: ClientError) -> ClientError {
        self.apply(SessionEvent::Failed(error.user_message()));
        error
    }
}
