//! Device credentials and the signing secret they select

use super::codec::Base64Codec;
use super::token::TokenError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Whether the token is bound to the whole product or one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthScope {
    /// Sign with the device secret, resource `products/{pid}/devices/{dev}`
    #[default]
    Device,
    /// Sign with the product secret, resource `products/{pid}`
    Product,
}

impl FromStr for AuthScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "device" => Ok(AuthScope::Device),
            "product" => Ok(AuthScope::Product),
            other => Err(format!(
                "unknown auth scope '{other}', expected 'device' or 'product'"
            )),
        }
    }
}

impl fmt::Display for AuthScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthScope::Device => f.write_str("device"),
            AuthScope::Product => f.write_str("product"),
        }
    }
}

/// A secret kept in its base64 storage encoding until sign time
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedSecret(String);

impl EncodedSecret {
    pub fn new<S: Into<String>>(encoded: S) -> Self {
        Self(encoded.into())
    }

    /// Decode into raw key bytes.
    ///
    /// An empty result is an error, never an empty-but-valid key.
    pub fn decode(&self, codec: &dyn Base64Codec) -> Result<Vec<u8>, TokenError> {
        let bytes = codec
            .decode(&self.0)
            .map_err(|e| TokenError::InvalidSecret(e.to_string()))?;
        if bytes.is_empty() {
            return Err(TokenError::InvalidSecret(
                "secret decodes to zero bytes".to_string(),
            ));
        }
        Ok(bytes)
    }
}

impl fmt::Debug for EncodedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncodedSecret(***)")
    }
}

/// Immutable device identity used for every token build
#[derive(Debug, Clone)]
pub struct Credential {
    product_id: String,
    product_secret: EncodedSecret,
    device_name: String,
    device_secret: EncodedSecret,
    auth_scope: AuthScope,
}

impl Credential {
    pub fn new(
        product_id: impl Into<String>,
        product_secret: EncodedSecret,
        device_name: impl Into<String>,
        device_secret: EncodedSecret,
        auth_scope: AuthScope,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            product_secret,
            device_name: device_name.into(),
            device_secret,
            auth_scope,
        }
    }

    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn auth_scope(&self) -> AuthScope {
        self.auth_scope
    }

    /// The secret in effect for the configured scope
    pub fn signing_secret(&self) -> &EncodedSecret {
        match self.auth_scope {
            AuthScope::Device => &self.device_secret,
            AuthScope::Product => &self.product_secret,
        }
    }

    /// Resource path the token is bound to
    pub fn resource(&self) -> String {
        match self.auth_scope {
            AuthScope::Device => format!(
                "products/{}/devices/{}",
                self.product_id, self.device_name
            ),
            AuthScope::Product => format!("products/{}", self.product_id),
        }
    }
}
