//! Golden-vector tests for access token construction
//!
//! Vectors were computed once from the reference algorithm and pinned.

use chrono::{TimeZone, Utc};
use onenet_device::auth::token::signing_string;
use onenet_device::auth::{
    AuthScope, Base64Codec, Credential, EncodedSecret, HmacSha1Signer, PercentCodec, StandardBase64,
    TokenBuilder, TokenError, TokenSigner, UrlCodec,
};

const SECRET: &str = "c2VjcmV0LWtleQ==";
const NOW: i64 = 1_861_920_000;

fn credential(scope: AuthScope) -> Credential {
    Credential::new(
        "abc",
        EncodedSecret::new(SECRET),
        "dev-01",
        EncodedSecret::new(SECRET),
        scope,
    )
}

fn now() -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(NOW, 0).unwrap()
}

#[test]
fn test_product_scope_golden_digest() {
    let message = signing_string(1_893_456_000, "sha1", "products/abc", "2018-10-31");
    assert_eq!(message, "1893456000\nsha1\nproducts/abc\n2018-10-31");

    let digest = HmacSha1Signer.sign(b"secret-key", message.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    assert_eq!(hex, "e2a0bd2de67f62e86530bf144c2176e24b965e80");
    assert_eq!(StandardBase64.encode(&digest), "4qC9LeZ/YuhlML8UTCF24kuWXoA=");
}

#[test]
fn test_product_scope_golden_token() {
    let token = TokenBuilder::default()
        .build(&credential(AuthScope::Product), now())
        .unwrap();

    assert_eq!(
        token.as_password(),
        "version=2018-10-31&res=products%2Fabc&et=1893456000&method=sha1&sign=4qC9LeZ%2FYuhlML8UTCF24kuWXoA%3D"
    );
    assert_eq!(token.resource(), "products/abc");
    assert_eq!(token.expiry(), 1_893_456_000);
}

#[test]
fn test_device_scope_golden_token() {
    let token = TokenBuilder::default()
        .build(&credential(AuthScope::Device), now())
        .unwrap();

    assert_eq!(
        token.as_password(),
        "version=2018-10-31&res=products%2Fabc%2Fdevices%2Fdev-01&et=1893456000&method=sha1&sign=%2FZT1FQI2G8ybaLYdA0Nbl7AvLoM%3D"
    );
}

#[test]
fn test_rfc2202_hmac_sha1_vector() {
    let digest = HmacSha1Signer.sign(b"Jefe", b"what do ya want for nothing?");
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    assert_eq!(hex, "effcdf6ae5eb2fa2d27416d5f184df9c259a7c79");
}

#[test]
fn test_each_field_unescapes_to_its_value() {
    let token = TokenBuilder::default()
        .build(&credential(AuthScope::Device), now())
        .unwrap();

    let fields: Vec<(String, String)> = token
        .as_password()
        .split('&')
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap();
            (key.to_string(), PercentCodec.unescape(value).unwrap())
        })
        .collect();

    assert_eq!(
        fields,
        vec![
            ("version".to_string(), "2018-10-31".to_string()),
            ("res".to_string(), "products/abc/devices/dev-01".to_string()),
            ("et".to_string(), "1893456000".to_string()),
            ("method".to_string(), "sha1".to_string()),
            ("sign".to_string(), token.signature().to_string()),
        ]
    );
}

#[test]
fn test_empty_signing_secret_is_invalid() {
    let credential = Credential::new(
        "abc",
        EncodedSecret::new(SECRET),
        "dev-01",
        EncodedSecret::new(""),
        AuthScope::Device,
    );

    let result = TokenBuilder::default().build(&credential, now());
    assert!(matches!(result, Err(TokenError::InvalidSecret(_))));
}

#[test]
fn test_scope_selects_secret() {
    // Product secret is unusable; device scope must not touch it
    let credential = Credential::new(
        "abc",
        EncodedSecret::new("not base64!"),
        "dev-01",
        EncodedSecret::new(SECRET),
        AuthScope::Device,
    );
    assert!(TokenBuilder::default().build(&credential, now()).is_ok());
}
