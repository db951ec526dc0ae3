//! Keys and tokens shared by the unit tests.

use crate::jwks::{Jwk, Jwks};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::{Value, json};
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const AUDIENCE: &str = "com.example.notes";
pub const ISSUER: &str = "https://appleid.apple.com";

// Key generation is slow in debug builds; share two keys across all tests.
static KEY: LazyLock<RsaPrivateKey> = LazyLock::new(|| {
    RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("failed to generate a key")
});
static OTHER_KEY: LazyLock<RsaPrivateKey> = LazyLock::new(|| {
    RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("failed to generate a key")
});

pub fn test_key() -> &'static RsaPrivateKey {
    &KEY
}

pub fn other_key() -> &'static RsaPrivateKey {
    &OTHER_KEY
}

pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

pub fn jwk_for(private_key: &RsaPrivateKey, kid: &str) -> Jwk {
    let public_key = RsaPublicKey::from(private_key);
    Jwk {
        kty: "RSA".to_string(),
        kid: kid.to_string(),
        n: URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
        e: URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
        alg: Some("RS256".to_string()),
        r#use: Some("sig".to_string()),
    }
}

/// Claims an Apple identity token would carry, valid for an hour.
pub fn claims(audience: &str, issuer: &str) -> Value {
    json!({
        "iss": issuer,
        "aud": audience,
        "sub": "001234.abcdef.0042",
        "iat": now(),
        "exp": now() + 3600,
        "email": "someone@privaterelay.appleid.com",
        "email_verified": true
    })
}

pub fn mint(private_key: &RsaPrivateKey, kid: &str, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());

    let encoding_key = EncodingKey::from_rsa_der(private_key.to_pkcs1_der().unwrap().as_bytes());
    encode(&header, claims, &encoding_key).unwrap()
}

/// Serves `jwks` at `/auth/keys`, expecting exactly `expected_fetches` requests.
pub async fn jwks_server(jwks: Jwks, expected_fetches: u64) -> MockServer {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/keys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks))
        .expect(expected_fetches)
        .mount(&mock_server)
        .await;
    mock_server
}
