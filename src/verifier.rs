//! Local verification of RS256-style identity tokens against a JWKS.

use crate::{claims::TokenClaims, error::VerifyError, jwks::KeyResolver, key::SigningKey};
use jsonwebtoken::{Validation, decode, decode_header, errors::ErrorKind};
use std::time::{SystemTime, UNIX_EPOCH};

/// Verifies compact signed tokens using keys from one issuer's key set.
#[derive(Clone)]
pub struct TokenVerifier {
    resolver: KeyResolver,
}

impl TokenVerifier {
    pub fn new(resolver: KeyResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &KeyResolver {
        &self.resolver
    }

    /// Verifies `token` against the current time.
    ///
    /// # Errors
    /// The first failed check, in order: structure, key lookup, signature,
    /// expiry, audience, issuer.
    pub async fn verify(
        &self,
        token: &str,
        expected_audience: &str,
        expected_issuer: &str,
    ) -> Result<TokenClaims, VerifyError> {
        self.verify_at(token, expected_audience, expected_issuer, unix_now())
            .await
    }

    /// Like [`Self::verify`] with an explicit clock reading in UNIX seconds.
    ///
    /// # Errors
    /// See [`Self::verify`].
    pub async fn verify_at(
        &self,
        token: &str,
        expected_audience: &str,
        expected_issuer: &str,
        now: u64,
    ) -> Result<TokenClaims, VerifyError> {
        let kid = key_id(token)?;
        let key = self.resolver.resolve(&kid).await?;
        let claims = verify_signature(token, &key)?;
        check_claims(&claims, expected_audience, expected_issuer, now)?;
        Ok(claims)
    }
}

/// Reads the `kid` from the unverified header.
fn key_id(token: &str) -> Result<String, VerifyError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
        return Err(VerifyError::MalformedToken);
    }

    let header = decode_header(token).map_err(|e| {
        tracing::debug!("undecodable token header: {}", e);
        VerifyError::MalformedToken
    })?;
    header.kid.ok_or(VerifyError::MalformedToken)
}

fn verify_signature(token: &str, key: &SigningKey) -> Result<TokenClaims, VerifyError> {
    // Only the signature is checked here; the claim checks follow in
    // `check_claims` so that each failure maps to its own error.
    let mut validation = Validation::new(key.algorithm);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    decode::<TokenClaims>(token, &key.key, &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                tracing::debug!("token payload undecodable: {}", e);
                VerifyError::MalformedToken
            }
            _ => {
                tracing::debug!(kid = %key.kid, "signature rejected: {}", e);
                VerifyError::SignatureMismatch
            }
        })
}

fn check_claims(
    claims: &TokenClaims,
    expected_audience: &str,
    expected_issuer: &str,
    now: u64,
) -> Result<(), VerifyError> {
    if now >= claims.exp {
        return Err(VerifyError::Expired);
    }
    if !claims
        .aud
        .as_ref()
        .is_some_and(|aud| aud.contains(expected_audience))
    {
        return Err(VerifyError::AudienceMismatch);
    }
    if claims.iss.as_deref() != Some(expected_issuer) {
        return Err(VerifyError::IssuerMismatch);
    }
    Ok(())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
