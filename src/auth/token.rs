//! Access token construction
//!
//! A token is a query-string shaped value sent as the MQTT CONNECT password:
//!
//! ```text
//! version={v}&res={resource}&et={expiry}&method={method}&sign={signature}
//! ```
//!
//! The signature is the base64 HMAC of the signing string
//! `"{et}\n{method}\n{res}\n{version}"` keyed with the decoded scope secret.
//! Every field is percent-encoded independently.

use super::codec::{Base64Codec, PercentCodec, StandardBase64, UrlCodec};
use super::credential::Credential;
use super::signer::{HmacSha1Signer, TokenSigner};
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

/// Signature scheme version understood by the broker
pub const TOKEN_ALG_VERSION: &str = "2018-10-31";

/// Default token lifetime: 8760 hours
pub const DEFAULT_TOKEN_VALIDITY_SECS: i64 = 8760 * 3600;

/// Token build failures. Both are deterministic; retrying with the same
/// inputs yields the same error.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TokenError {
    #[error("invalid signing secret: {0}")]
    InvalidSecret(String),
    #[error("failed to percent-encode token field '{field}': {reason}")]
    Encoding { field: &'static str, reason: String },
    #[error("token expiry out of range: validity of {validity_secs}s from {now}")]
    ExpiryOutOfRange { validity_secs: i64, now: DateTime<Utc> },
}

/// A built token. Field values are kept unescaped; `as_password` yields the
/// encoded wire form.
#[derive(Clone, PartialEq)]
pub struct AccessToken {
    version: String,
    resource: String,
    expiry: i64,
    method: String,
    signature: String,
    encoded: String,
}

impl AccessToken {
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Expiry in epoch seconds
    pub fn expiry(&self) -> i64 {
        self.expiry
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.expiry, 0)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.expiry
    }

    /// Percent-encoded wire form used as the MQTT password
    pub fn as_password(&self) -> &str {
        &self.encoded
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("version", &self.version)
            .field("resource", &self.resource)
            .field("expiry", &self.expiry)
            .field("method", &self.method)
            .field("signature", &"***")
            .finish()
    }
}

/// Builds access tokens from a credential and a point in time
#[derive(Clone)]
pub struct TokenBuilder {
    validity: Duration,
    version: String,
    signer: Arc<dyn TokenSigner>,
    base64: Arc<dyn Base64Codec>,
    url: Arc<dyn UrlCodec>,
}

impl Default for TokenBuilder {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_TOKEN_VALIDITY_SECS))
    }
}

impl TokenBuilder {
    /// Builder with the default HMAC-SHA1, base64 and percent-encoding backends
    pub fn new(validity: Duration) -> Self {
        Self {
            validity,
            version: TOKEN_ALG_VERSION.to_string(),
            signer: Arc::new(HmacSha1Signer),
            base64: Arc::new(StandardBase64),
            url: Arc::new(PercentCodec),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_signer(mut self, signer: Arc<dyn TokenSigner>) -> Self {
        self.signer = signer;
        self
    }

    pub fn with_base64(mut self, codec: Arc<dyn Base64Codec>) -> Self {
        self.base64 = codec;
        self
    }

    pub fn with_url_codec(mut self, codec: Arc<dyn UrlCodec>) -> Self {
        self.url = codec;
        self
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Build a token valid from `now` for the configured window
    pub fn build(
        &self,
        credential: &Credential,
        now: DateTime<Utc>,
    ) -> Result<AccessToken, TokenError> {
        let expiry = now
            .checked_add_signed(self.validity)
            .ok_or(TokenError::ExpiryOutOfRange {
                validity_secs: self.validity.num_seconds(),
                now,
            })?
            .timestamp();
        let resource = credential.resource();
        let method = self.signer.method();

        let key = credential.signing_secret().decode(self.base64.as_ref())?;

        let signing_string = signing_string(expiry, method, &resource, &self.version);
        debug!(
            scope = %credential.auth_scope(),
            "string to sign = {:?}", signing_string
        );

        let digest = self.signer.sign(&key, signing_string.as_bytes());
        let signature = self.base64.encode(&digest);
        trace!("signature = {}", signature);

        let expiry_str = expiry.to_string();
        let version_enc = self.escape("version", &self.version)?;
        let resource_enc = self.escape("res", &resource)?;
        let expiry_enc = self.escape("et", &expiry_str)?;
        let method_enc = self.escape("method", method)?;
        let signature_enc = self.escape("sign", &signature)?;

        let encoded = format!(
            "version={version_enc}&res={resource_enc}&et={expiry_enc}&method={method_enc}&sign={signature_enc}"
        );
        trace!("token = {}", encoded);

        Ok(AccessToken {
            version: self.version.clone(),
            resource,
            expiry,
            method: method.to_string(),
            signature,
            encoded,
        })
    }

    fn escape(&self, field: &'static str, value: &str) -> Result<String, TokenError> {
        self.url.escape(value).map_err(|e| TokenError::Encoding {
            field,
            reason: e.to_string(),
        })
    }
}

/// Canonical newline-joined string that gets signed
pub fn signing_string(expiry: i64, method: &str, resource: &str, version: &str) -> String {
    format!("{expiry}\n{method}\n{resource}\n{version}")
}
