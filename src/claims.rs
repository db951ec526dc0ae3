//! Claims carried by a verified identity token.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Claims of a verified identity token.
///
/// Only [`crate::verifier::TokenVerifier`] hands these out, and only after the
/// signature, expiry, audience and issuer have all been checked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject: the user's stable id at the identity provider.
    pub sub: String,
    /// Audience. A missing audience never matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,
    /// Issuer. A missing issuer never matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Expiration time (UNIX timestamp).
    pub exp: u64,
    /// Issued at (UNIX timestamp).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    /// Everything else lands here
    #[serde(flatten)]
    pub other: HashMap<String, Value>,
}

/// The `aud` claim, which RFC 7519 allows to be a string or an array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    /// Exact, case-sensitive match against the expected audience.
    pub fn contains(&self, expected: &str) -> bool {
        match self {
            Audience::One(aud) => aud == expected,
            Audience::Many(auds) => auds.iter().any(|aud| aud == expected),
        }
    }
}

impl TokenClaims {
    /// Display name, when the provider includes one (Firebase does, Apple doesn't).
    pub fn name(&self) -> Option<&str> {
        self.other.get("name").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_claims_are_preserved() {
        let payload = json!({
            "iss": "https://securetoken.google.com/notes-app",
            "aud": "notes-app",
            "sub": "uid-1",
            "exp": 1_900_000_000u64,
            "auth_time": 1_800_000_000u64,
            "firebase": { "sign_in_provider": "password" },
            "name": "Dana Scully"
        });

        let claims: TokenClaims = serde_json::from_value(payload.clone()).unwrap();

        assert_eq!(claims.name(), Some("Dana Scully"));
        assert_eq!(claims.iat, None);
        assert_eq!(serde_json::to_value(&claims).unwrap(), payload);
    }

    #[test]
    fn test_audience_matches_exactly() {
        let one = Audience::One("com.example.notes".to_string());
        assert!(one.contains("com.example.notes"));
        assert!(!one.contains("com.example.note"));
        assert!(!one.contains("COM.example.notes"));

        let many: Audience = serde_json::from_value(json!(["a", "com.example.notes"])).unwrap();
        assert!(many.contains("com.example.notes"));
        assert!(!many.contains("b"));
    }
}
