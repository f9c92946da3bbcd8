//! OpenID Connect bearer-token validation
//!
//! Tokens are validated locally against the issuer's JWKS, fetched through
//! the discovery document and cached for the configured refresh interval.
//! Provider connectivity problems surface as 503, token problems as 401.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::OpenIdConnectConfig;
use crate::error::{Result, WsGateError};

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    jwks_uri: String,
}

#[derive(Debug, Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    #[serde(default)]
    kid: Option<String>,
    kty: String,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

/// Claims the proxy cares about; everything else is ignored
#[derive(Debug, Deserialize)]
struct TokenClaims {
    sub: String,
    #[serde(default)]
    preferred_username: Option<String>,
}

#[derive(Default)]
struct KeyCache {
    fetched_at: Option<Instant>,
    /// RSA components per key id
    keys: HashMap<String, (String, String)>,
}

/// Validates bearer tokens issued by one OpenID Connect provider
pub struct OidcAuthenticator {
    issuer: String,
    audience: Option<String>,
    refresh: Duration,
    http: reqwest::Client,
    cache: RwLock<KeyCache>,
}

impl OidcAuthenticator {
    pub fn new(config: &OpenIdConnectConfig) -> Result<Self> {
        let issuer = config
            .issuer
            .clone()
            .ok_or_else(|| WsGateError::config_msg("openid-connect.issuer is required"))?;
        Ok(Self {
            issuer: issuer.trim_end_matches('/').to_string(),
            audience: config.audience.clone(),
            refresh: Duration::from_secs(config.jwks_refresh_secs),
            http: reqwest::Client::new(),
            cache: RwLock::new(KeyCache::default()),
        })
    }

    /// Validate the request's bearer token and return the authenticated
    /// principal name.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<String> {
        let header = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                WsGateError::Authentication("missing Authorization header".to_string())
            })?;
        let token = header.strip_prefix("Bearer ").ok_or_else(|| {
            WsGateError::Authentication("expected Bearer authorization".to_string())
        })?;

        let token_header = decode_header(token)
            .map_err(|e| WsGateError::InvalidToken(format!("undecodable token header: {e}")))?;
        let kid = token_header
            .kid
            .ok_or_else(|| WsGateError::InvalidToken("token has no key id".to_string()))?;

        let (n, e) = self.key_components(&kid).await?;
        let key = DecodingKey::from_rsa_components(&n, &e)
            .map_err(|e| WsGateError::InvalidPublicKey(format!("bad JWKS key: {e}")))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[&self.issuer]);
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let data = decode::<TokenClaims>(token, &key, &validation)
            .map_err(|e| WsGateError::InvalidToken(e.to_string()))?;
        let principal = data
            .claims
            .preferred_username
            .unwrap_or(data.claims.sub);
        debug!(principal = %principal, "Validated bearer token");
        Ok(principal)
    }

    /// RSA components for a key id, refreshing the JWKS cache when the key is
    /// unknown or the cache is stale.
    async fn key_components(&self, kid: &str) -> Result<(String, String)> {
        {
            let cache = self.cache.read();
            let fresh = cache
                .fetched_at
                .map(|at| at.elapsed() < self.refresh)
                .unwrap_or(false);
            if fresh {
                if let Some(components) = cache.keys.get(kid) {
                    return Ok(components.clone());
                }
            }
        }

        let keys = self.fetch_jwks().await?;
        let mut cache = self.cache.write();
        cache.fetched_at = Some(Instant::now());
        cache.keys = keys;
        cache
            .keys
            .get(kid)
            .cloned()
            .ok_or_else(|| WsGateError::InvalidToken(format!("unknown signing key '{kid}'")))
    }

    async fn fetch_jwks(&self) -> Result<HashMap<String, (String, String)>> {
        let discovery_url = format!("{}/.well-known/openid-configuration", self.issuer);
        let discovery: DiscoveryDocument = self
            .http
            .get(&discovery_url)
            .send()
            .await
            .map_err(|e| WsGateError::OpenIdConnect(format!("discovery fetch failed: {e}")))?
            .json()
            .await
            .map_err(|e| WsGateError::OpenIdConnect(format!("bad discovery document: {e}")))?;

        let jwks: Jwks = self
            .http
            .get(&discovery.jwks_uri)
            .send()
            .await
            .map_err(|e| WsGateError::OpenIdConnect(format!("JWKS fetch failed: {e}")))?
            .json()
            .await
            .map_err(|e| WsGateError::OpenIdConnect(format!("bad JWKS document: {e}")))?;

        let mut keys = HashMap::new();
        for jwk in jwks.keys {
            if jwk.kty != "RSA" {
                continue;
            }
            match (jwk.kid, jwk.n, jwk.e) {
                (Some(kid), Some(n), Some(e)) => {
                    keys.insert(kid, (n, e));
                }
                _ => warn!("Skipping JWKS entry without kid or RSA components"),
            }
        }
        debug!(keys = keys.len(), "Refreshed JWKS cache");
        Ok(keys)
    }
}
