//! Fetching and caching an issuer's published JSON Web Key Set.

use crate::{config::JwksConfig, error::VerifyError, key::SigningKey};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

const NEVER: u64 = u64::MAX;

/// A JSON Web Key Set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Jwks {
    /// List of keys.
    pub keys: Vec<Jwk>,
}

/// A JSON Web Key.
///
/// Only the RSA members are modelled; other key types still deserialize
/// (with empty `n`/`e`) so one exotic entry can't poison the whole set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type (e.g., "RSA").
    pub kty: String,
    /// Key ID.
    #[serde(default)]
    pub kid: String,
    /// Modulus (Base64URL encoded).
    #[serde(default)]
    pub n: String,
    /// Exponent (Base64URL encoded).
    #[serde(default)]
    pub e: String,
    /// Algorithm (e.g., "RS256").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Key use (e.g., "sig").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#use: Option<String>,
}

impl Jwks {
    /// First key whose id equals `kid` exactly.
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid == kid)
    }
}

#[derive(Debug)]
struct FetchedJwks {
    jwks: Jwks,
    fetched_at: Instant,
}

/// Rate limit for refetches caused by unknown `kid`s, shared by all clones
/// of a resolver.
#[derive(Debug)]
struct RefreshThrottle {
    interval: Duration,
    origin: Instant,
    /// Milliseconds after `origin` of the last claimed refresh, or `NEVER`.
    last_claimed: AtomicU64,
}

impl RefreshThrottle {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            origin: Instant::now(),
            last_claimed: AtomicU64::new(NEVER),
        }
    }

    /// True for exactly one caller per interval.
    fn try_claim(&self) -> bool {
        let now = self.origin.elapsed().as_millis() as u64;
        let interval = self.interval.as_millis() as u64;
        let last = self.last_claimed.load(Ordering::Acquire);
        if last != NEVER && now.saturating_sub(last) < interval {
            return false;
        }
        self.last_claimed
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Resolves signing keys by id from one issuer's JWKS endpoint.
///
/// With a non-zero TTL the key set is cached; concurrent misses share a
/// single fetch. With a TTL of zero every resolution fetches the set again.
#[derive(Clone)]
pub struct KeyResolver {
    jwks_url: String,
    http: reqwest::Client,
    cache: Option<Cache<String, Arc<FetchedJwks>>>,
    refresh: Arc<RefreshThrottle>,
}

impl KeyResolver {
    /// # Errors
    /// Fails if the HTTP client can't be constructed.
    pub fn new(jwks_url: impl Into<String>, config: &JwksConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()?;

        let cache = (config.cache_ttl_secs > 0).then(|| {
            Cache::builder()
                .max_capacity(1)
                .time_to_live(Duration::from_secs(config.cache_ttl_secs))
                .build()
        });

        Ok(Self {
            jwks_url: jwks_url.into(),
            http,
            cache,
            refresh: Arc::new(RefreshThrottle::new(Duration::from_secs(
                config.min_refresh_interval_secs,
            ))),
        })
    }

    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    /// Finds the key identified by `kid`.
    ///
    /// # Errors
    /// [`VerifyError::KeyNotFound`] if no usable key carries `kid`;
    /// [`VerifyError::UpstreamUnavailable`] if the key set can't be fetched.
    #[tracing::instrument(skip(self), fields(jwks_url = %self.jwks_url))]
    pub async fn resolve(&self, kid: &str) -> Result<SigningKey, VerifyError> {
        let (fresh, fetched) = self.key_set(false).await?;
        if let Some(jwk) = fetched.jwks.find(kid) {
            return SigningKey::from_jwk(jwk).ok_or(VerifyError::KeyNotFound);
        }

        // The issuer may have rotated keys since the set was cached.
        if !fresh && fetched.fetched_at.elapsed() >= self.refresh.interval {
            let refreshed = if self.refresh.try_claim() {
                tracing::info!("kid not in cached key set, refreshing");
                self.key_set(true).await?.1
            } else {
                // Another request holds the refresh; this read joins its load
                // or sees the set it stored.
                self.key_set(false).await?.1
            };
            if let Some(jwk) = refreshed.jwks.find(kid) {
                return SigningKey::from_jwk(jwk).ok_or(VerifyError::KeyNotFound);
            }
        }

        tracing::warn!("no signing key found");
        Err(VerifyError::KeyNotFound)
    }

    /// Returns the key set and whether it was fetched by this call.
    async fn key_set(&self, refresh: bool) -> Result<(bool, Arc<FetchedJwks>), VerifyError> {
        let Some(cache) = &self.cache else {
            let fetched = self.fetch().await.map_err(unavailable)?;
            return Ok((true, Arc::new(fetched)));
        };

        if refresh {
            cache.invalidate(self.jwks_url.as_str()).await;
        }

        let entry = cache
            .entry_by_ref(self.jwks_url.as_str())
            .or_try_insert_with(async { self.fetch().await.map(Arc::new) })
            .await
            .map_err(|e| unavailable(&*e))?;

        Ok((entry.is_fresh(), entry.into_value()))
    }

    async fn fetch(&self) -> Result<FetchedJwks, reqwest::Error> {
        tracing::debug!("fetching JWKS");
        let jwks: Jwks = self
            .http
            .get(&self.jwks_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        tracing::debug!(keys = jwks.keys.len(), "fetched JWKS");

        Ok(FetchedJwks {
            jwks,
            fetched_at: Instant::now(),
        })
    }
}

fn unavailable(err: impl std::fmt::Display) -> VerifyError {
    tracing::error!("Failed to fetch JWKS: {}", err);
    VerifyError::UpstreamUnavailable(err.to_string())
}
