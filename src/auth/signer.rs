//! HMAC signing of the canonical token string
//!
//! The broker fixes SHA-1 for its `2018-10-31` token scheme. This is a wire
//! requirement of the target broker; do not swap the digest without a new
//! scheme version.

use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Keyed digest over a signing string
pub trait TokenSigner: Send + Sync {
    /// Value placed in the token's `method` field
    fn method(&self) -> &'static str;

    /// Compute the digest of `message` under `key`
    fn sign(&self, key: &[u8], message: &[u8]) -> Vec<u8>;
}

/// HMAC-SHA1 signer (`method=sha1`)
#[derive(Debug, Clone, Copy, Default)]
pub struct HmacSha1Signer;

impl TokenSigner for HmacSha1Signer {
    fn method(&self) -> &'static str {
        "sha1"
    }

    fn sign(&self, key: &[u8], message: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha1::new_from_slice(key).expect("HMAC accepts keys of any length");
        mac.update(message);
        mac.finalize().into_bytes().to_vec()
    }
}
