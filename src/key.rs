//! Verification keys reconstructed from published JWKs.

use crate::jwks::Jwk;
use jsonwebtoken::{Algorithm, DecodingKey};
use std::str::FromStr;

/// A public key able to verify tokens signed under `kid`.
#[derive(Clone)]
pub struct SigningKey {
    pub kid: String,
    pub algorithm: Algorithm,
    pub key: DecodingKey,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Builds a verification key from an RSA JWK.
    ///
    /// Returns `None` for keys that can't verify signatures: non-RSA key
    /// types, encryption-only keys, non-RSA algorithms, or undecodable
    /// modulus/exponent. A missing `alg` defaults to RS256.
    pub fn from_jwk(jwk: &Jwk) -> Option<Self> {
        if jwk.kty != "RSA" {
            return None;
        }
        if jwk.r#use.as_deref().is_some_and(|u| u != "sig") {
            return None;
        }

        let algorithm = match jwk.alg.as_deref() {
            Some(alg) => Algorithm::from_str(alg).ok()?,
            None => Algorithm::RS256,
        };
        if !matches!(
            algorithm,
            Algorithm::RS256
                | Algorithm::RS384
                | Algorithm::RS512
                | Algorithm::PS256
                | Algorithm::PS384
                | Algorithm::PS512
        ) {
            return None;
        }

        let key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
            .inspect_err(|e| tracing::warn!(kid = %jwk.kid, "unusable JWK: {}", e))
            .ok()?;

        Some(Self {
            kid: jwk.kid.clone(),
            algorithm,
            key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwk(kty: &str, alg: Option<&str>, key_use: Option<&str>) -> Jwk {
        Jwk {
            kty: kty.to_string(),
            kid: "k1".to_string(),
            // Fixed 2048-bit modulus, never used to verify anything here.
            n: "sXchDaQebHnPiGvyDOAT4saGEUetSyo9MKLOoWFsueri23bOdgWp4Dy1WlUzewbgBHod5pcM9H95GQRV3JDXboIRROSBigeC5yjU1hGzHHyXss8UDprecbAYxknTcQkhslANGRUZmdTOQ5qTRsLAt6BTYuyvVRdhS8exSZEy_c4gs_7svlJJQ4H9_NxsiIoLwAEk7-Q3UXERGYw_75IDrGA84-lA_-Ct4eTlXHBIY2EaV7t7LjJaynVJCpkv4LKjTTAumiGUIuQhrNhZLuF_RJLqHpM2kgWFLU7-VTdL1VbC2tejvcI2BlMkEpk1BzBZI0KQB0GaDWFLN-aEAw3vRw".to_string(),
            e: "AQAB".to_string(),
            alg: alg.map(str::to_string),
            r#use: key_use.map(str::to_string),
        }
    }

    #[test]
    fn test_rsa_signing_key_is_accepted() {
        let key = SigningKey::from_jwk(&jwk("RSA", Some("RS256"), Some("sig"))).unwrap();
        assert_eq!(key.kid, "k1");
        assert_eq!(key.algorithm, Algorithm::RS256);
    }

    #[test]
    fn test_missing_alg_defaults_to_rs256() {
        let key = SigningKey::from_jwk(&jwk("RSA", None, None)).unwrap();
        assert_eq!(key.algorithm, Algorithm::RS256);
    }

    #[test]
    fn test_unusable_keys_are_rejected() {
        assert!(SigningKey::from_jwk(&jwk("EC", Some("ES256"), Some("sig"))).is_none());
        assert!(SigningKey::from_jwk(&jwk("RSA", Some("RS256"), Some("enc"))).is_none());
        assert!(SigningKey::from_jwk(&jwk("RSA", Some("HS256"), Some("sig"))).is_none());
        assert!(SigningKey::from_jwk(&jwk("RSA", Some("none"), Some("sig"))).is_none());
    }
}
