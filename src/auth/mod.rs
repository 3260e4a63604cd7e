//! Signed access tokens for broker authentication
//!
//! - [`codec`] - base64 and percent-encoding capabilities
//! - [`signer`] - keyed digest over the signing string
//! - [`credential`] - product/device identity and the secret in effect
//! - [`token`] - assembles the final token string

pub mod codec;
pub mod credential;
pub mod signer;
pub mod token;

pub use codec::{Base64Codec, CodecError, PercentCodec, StandardBase64, UrlCodec};
pub use credential::{AuthScope, Credential, EncodedSecret};
pub use signer::{HmacSha1Signer, TokenSigner};
pub use token::{
    AccessToken, TokenBuilder, TokenError, DEFAULT_TOKEN_VALIDITY_SECS, TOKEN_ALG_VERSION,
};
