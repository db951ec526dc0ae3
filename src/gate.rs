//! Authentication of inbound requests.
//!
//! Every handler calls [`Gate::authenticate`] before it touches the request
//! body. The bearer token's (unverified) issuer picks the identity provider;
//! that provider's verifier then checks the token for real.

use crate::{
    audit,
    claims::TokenClaims,
    config::Settings,
    error::{ApiError, VerifyError},
    jwks::KeyResolver,
    verifier::TokenVerifier,
};
use axum::http::{HeaderMap, header};
use serde::Deserialize;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    Apple,
    Firebase,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Apple => f.write_str("apple"),
            ProviderKind::Firebase => f.write_str("firebase"),
        }
    }
}

/// One accepted token issuer and the audience it must address.
#[derive(Clone)]
pub struct IdentityProvider {
    pub kind: ProviderKind,
    pub audience: String,
    pub issuer: String,
    pub verifier: TokenVerifier,
}

/// The caller behind an authenticated request.
#[derive(Debug, Clone)]
pub struct Identity {
    pub provider: ProviderKind,
    pub claims: TokenClaims,
}

#[derive(Clone)]
pub struct Gate {
    providers: Vec<IdentityProvider>,
}

#[derive(Clone, Deserialize)]
struct IssuerOnly {
    iss: Option<String>,
}

impl Gate {
    pub fn new(providers: Vec<IdentityProvider>) -> Self {
        Self { providers }
    }

    /// Builds one provider per configured identity service.
    ///
    /// # Errors
    /// Fails if an HTTP client for a key set can't be constructed.
    pub fn from_settings(settings: &Settings) -> Result<Self, reqwest::Error> {
        let mut providers = Vec::new();

        if let Some(apple) = &settings.apple {
            providers.push(IdentityProvider {
                kind: ProviderKind::Apple,
                audience: apple.bundle_id.clone(),
                issuer: apple.issuer.clone(),
                verifier: TokenVerifier::new(KeyResolver::new(&apple.jwks_url, &settings.jwks)?),
            });
        }
        if let Some(firebase) = &settings.firebase {
            providers.push(IdentityProvider {
                kind: ProviderKind::Firebase,
                audience: firebase.project_id.clone(),
                issuer: firebase.issuer(),
                verifier: TokenVerifier::new(KeyResolver::new(&firebase.jwks_url, &settings.jwks)?),
            });
        }

        if providers.is_empty() {
            tracing::warn!("no identity provider configured, every request will be rejected");
        }
        Ok(Self::new(providers))
    }

    pub fn providers(&self) -> &[IdentityProvider] {
        &self.providers
    }

    /// Authenticates the request carrying `headers`.
    ///
    /// # Errors
    /// [`ApiError::MissingCredentials`] without a bearer token, otherwise
    /// [`ApiError::Unauthenticated`] with the verification failure.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Identity, ApiError> {
        let Some(token) = bearer_token(headers) else {
            audit!(outcome = "rejected", reason = "missing-credentials", "No bearer token");
            return Err(ApiError::MissingCredentials);
        };

        let provider = self.provider_for(token).inspect_err(|e| {
            audit!(outcome = "rejected", reason = e.kind(), "Token from unknown issuer");
        })?;

        match provider
            .verifier
            .verify(token, &provider.audience, &provider.issuer)
            .await
        {
            Ok(claims) => {
                audit!(
                    outcome = "accepted",
                    provider = %provider.kind,
                    subject = %claims.sub,
                    "Identity token accepted"
                );
                Ok(Identity {
                    provider: provider.kind,
                    claims,
                })
            }
            Err(e) => {
                audit!(
                    outcome = "rejected",
                    provider = %provider.kind,
                    reason = e.kind(),
                    jwks_url = provider.verifier.resolver().jwks_url(),
                    "Identity token rejected: {}",
                    e
                );
                Err(e.into())
            }
        }
    }

    fn provider_for(&self, token: &str) -> Result<&IdentityProvider, VerifyError> {
        let unverified = jsonwebtoken::dangerous::insecure_decode::<IssuerOnly>(token)
            .map_err(|_| VerifyError::MalformedToken)?;
        let issuer = unverified.claims.iss.ok_or(VerifyError::IssuerMismatch)?;

        self.providers
            .iter()
            .find(|p| p.issuer == issuer)
            .ok_or(VerifyError::IssuerMismatch)
    }
}

/// The token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::FIREBASE_ISSUER_PREFIX;
    use crate::jwks::{Jwks, tests::config};
    use crate::test_support::{AUDIENCE, ISSUER, claims, jwk_for, jwks_server, mint, test_key};
    use axum::http::HeaderValue;
    use wiremock::MockServer;

    pub(crate) const PROJECT_ID: &str = "notes-app";

    /// A gate accepting Apple and Firebase tokens whose keys are both served
    /// by one mock, which must see exactly `expected_fetches` requests.
    pub(crate) async fn gate(expected_fetches: u64) -> (MockServer, Gate) {
        let jwks = Jwks {
            keys: vec![jwk_for(test_key(), "abc")],
        };
        let server = jwks_server(jwks, expected_fetches).await;
        let jwks_url = format!("{}/auth/keys", server.uri());

        let gate = Gate::new(vec![
            IdentityProvider {
                kind: ProviderKind::Apple,
                audience: AUDIENCE.to_string(),
                issuer: ISSUER.to_string(),
                verifier: TokenVerifier::new(KeyResolver::new(&jwks_url, &config(0)).unwrap()),
            },
            IdentityProvider {
                kind: ProviderKind::Firebase,
                audience: PROJECT_ID.to_string(),
                issuer: format!("{FIREBASE_ISSUER_PREFIX}{PROJECT_ID}"),
                verifier: TokenVerifier::new(KeyResolver::new(&jwks_url, &config(0)).unwrap()),
            },
        ]);
        (server, gate)
    }

    fn headers(authorization: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(authorization).unwrap(),
        );
        headers
    }

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(bearer_token(&headers("Bearer abc.def.ghi")), Some("abc.def.ghi"));
        assert_eq!(bearer_token(&headers("bearer abc.def.ghi")), None);
        assert_eq!(bearer_token(&headers("Basic dXNlcjpwYXNz")), None);
        assert_eq!(bearer_token(&headers("Bearer ")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn test_missing_header_never_fetches_keys() {
        let (_server, gate) = gate(0).await;

        for h in [HeaderMap::new(), headers("Token abc"), headers("Bearer")] {
            let err = gate.authenticate(&h).await.unwrap_err();
            assert!(matches!(err, ApiError::MissingCredentials));
        }
    }

    #[tokio::test]
    async fn test_apple_token_is_accepted() {
        let (_server, gate) = gate(1).await;
        let token = mint(test_key(), "abc", &claims(AUDIENCE, ISSUER));

        let identity = gate
            .authenticate(&headers(&format!("Bearer {token}")))
            .await
            .unwrap();

        assert_eq!(identity.provider, ProviderKind::Apple);
        assert_eq!(identity.claims.sub, "001234.abcdef.0042");
    }

    #[tokio::test]
    async fn test_firebase_token_is_accepted() {
        let (_server, gate) = gate(1).await;
        let issuer = format!("{FIREBASE_ISSUER_PREFIX}{PROJECT_ID}");
        let token = mint(test_key(), "abc", &claims(PROJECT_ID, &issuer));

        let identity = gate
            .authenticate(&headers(&format!("Bearer {token}")))
            .await
            .unwrap();

        assert_eq!(identity.provider, ProviderKind::Firebase);
    }

    #[tokio::test]
    async fn test_audience_of_the_other_provider_is_rejected() {
        let (_server, gate) = gate(1).await;
        // Apple-issued, but addressed to the Firebase project.
        let token = mint(test_key(), "abc", &claims(PROJECT_ID, ISSUER));

        let err = gate
            .authenticate(&headers(&format!("Bearer {token}")))
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Unauthenticated(VerifyError::AudienceMismatch)));
    }

    #[tokio::test]
    async fn test_unknown_issuer_is_rejected_without_fetching() {
        let (_server, gate) = gate(0).await;
        let token = mint(test_key(), "abc", &claims(AUDIENCE, "https://accounts.example.com"));

        let err = gate
            .authenticate(&headers(&format!("Bearer {token}")))
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Unauthenticated(VerifyError::IssuerMismatch)));
    }

    #[tokio::test]
    async fn test_garbage_token_is_malformed() {
        let (_server, gate) = gate(0).await;

        let err = gate
            .authenticate(&headers("Bearer not-a-token"))
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Unauthenticated(VerifyError::MalformedToken)));
    }
}
