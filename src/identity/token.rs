//! Google ID token validation.
//!
//! Tokens are RS256-signed JWTs; signing keys come from Google's JWKS
//! endpoint and are cached in-process, refreshed when stale or when an
//! unknown key id shows up (Google rotates keys). Audience must equal the
//! configured OAuth client id. Signature or audience problems are
//! `TokenInvalid`; a valid token without `sub`/`email` is `ClaimsMissing`.

use crate::identity::{error::AuthError, federated::GoogleProfile, normalize};
use anyhow::{Context, Result};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error};

const GOOGLE_CERTS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const GOOGLE_ISSUERS: [&str; 2] = ["https://accounts.google.com", "accounts.google.com"];
const KEY_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Claims extracted from a validated Google ID token.
#[derive(Deserialize, Debug, Clone)]
pub struct GoogleClaims {
    pub sub: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub picture: String,
}

impl GoogleClaims {
    /// The identity-bearing claims must be present even in a
    /// cryptographically valid token.
    pub fn require_identity(&self) -> Result<(), AuthError> {
        if self.sub.is_empty() || self.email.is_empty() {
            return Err(AuthError::ClaimsMissing);
        }
        Ok(())
    }

    /// Fold the email here so every downstream lookup and insert sees the
    /// same lowercase form the password path stores.
    #[must_use]
    pub fn into_profile(self) -> GoogleProfile {
        GoogleProfile {
            name: self.name,
            email: normalize::fold_email(&self.email),
            subject: self.sub,
            picture: self.picture,
        }
    }
}

#[derive(Deserialize, Debug)]
struct Jwks {
    keys: Vec<Jwk>,
}

#[derive(Deserialize, Debug)]
struct Jwk {
    #[serde(default)]
    kid: String,
    #[serde(default)]
    n: String,
    #[serde(default)]
    e: String,
}

struct CachedKeys {
    fetched_at: Instant,
    keys: HashMap<String, DecodingKey>,
}

/// Validates Google ID tokens against a configured expected audience.
pub struct GoogleTokenVerifier {
    client_id: String,
    certs_url: String,
    http: reqwest::Client,
    cache: RwLock<Option<CachedKeys>>,
}

impl GoogleTokenVerifier {
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(client_id: String, user_agent: &str) -> Result<Self> {
        Self::with_certs_url(client_id, user_agent, GOOGLE_CERTS_URL.to_string())
    }

    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn with_certs_url(client_id: String, user_agent: &str, certs_url: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(8))
            .build()
            .context("failed to build JWKS http client")?;

        Ok(Self {
            client_id,
            certs_url,
            http,
            cache: RwLock::new(None),
        })
    }

    /// Validate signature, audience and issuer, then extract claims.
    pub async fn verify(&self, token: &str) -> Result<GoogleClaims, AuthError> {
        let header = decode_header(token).map_err(|err| {
            debug!("rejected token with undecodable header: {err}");
            AuthError::TokenInvalid
        })?;

        let Some(kid) = header.kid else {
            debug!("rejected token without key id");
            return Err(AuthError::TokenInvalid);
        };

        let key = self.key_for(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.client_id]);
        validation.set_issuer(&GOOGLE_ISSUERS);

        let data = decode::<GoogleClaims>(token, &key, &validation).map_err(|err| {
            debug!("token validation failed: {err}");
            AuthError::TokenInvalid
        })?;

        data.claims.require_identity()?;

        Ok(data.claims)
    }

    async fn key_for(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < KEY_CACHE_TTL {
                    if let Some(key) = cached.keys.get(kid) {
                        return Ok(key.clone());
                    }
                }
            }
        }

        // Stale cache or unknown kid: refetch once, then give up.
        let keys = self.fetch_keys().await.map_err(|err| {
            error!("failed to fetch Google signing keys: {err:?}");
            AuthError::TokenInvalid
        })?;

        let key = keys.get(kid).cloned();

        let mut cache = self.cache.write().await;
        *cache = Some(CachedKeys {
            fetched_at: Instant::now(),
            keys,
        });

        key.ok_or_else(|| {
            debug!("token signed with unknown key id {kid}");
            AuthError::TokenInvalid
        })
    }

    async fn fetch_keys(&self) -> Result<HashMap<String, DecodingKey>> {
        let jwks: Jwks = self
            .http
            .get(&self.certs_url)
            .send()
            .await
            .context("JWKS request failed")?
            .error_for_status()
            .context("JWKS endpoint returned an error status")?
            .json()
            .await
            .context("JWKS response was not valid JSON")?;

        let mut keys = HashMap::new();
        for jwk in jwks.keys {
            match DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
                Ok(key) => {
                    keys.insert(jwk.kid, key);
                }
                Err(err) => {
                    // Skip unusable entries; the remaining keys may still
                    // cover the token at hand.
                    error!("skipping malformed JWK {}: {err}", jwk.kid);
                }
            }
        }

        Ok(keys)
    }
}
