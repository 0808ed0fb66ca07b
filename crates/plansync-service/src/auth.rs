//! Request authentication.
//!
//! `AuthUser` validates an identity-provider session JWT (RS256) against the
//! issuer's JWKS. Keys are cached in [`AppState`] and refreshed hourly or on
//! an unknown `kid`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use plansync_core::UserId;

use crate::error::ApiError;
use crate::state::AppState;

/// How long to cache JWKS keys before refreshing.
const JWKS_CACHE_DURATION: Duration = Duration::from_secs(3600);

/// Timeout for JWKS fetch requests.
const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// An authenticated user extracted from a session token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The user ID (JWT subject).
    pub user_id: UserId,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(ApiError::Unauthorized)?;

        // Gated so the bypass never exists in production builds.
        #[cfg(any(test, feature = "test-auth"))]
        if let Some(subject) = token.strip_prefix("test-token:") {
            let user_id = UserId::new(subject).map_err(|_| ApiError::Unauthorized)?;
            return Ok(AuthUser { user_id });
        }

        let claims = validate_jwt(token, state).await?;
        let user_id = UserId::new(claims.sub).map_err(|_| ApiError::Unauthorized)?;

        Ok(AuthUser { user_id })
    }
}

/// JWT claims used from session tokens.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtClaims {
    /// Subject (user ID).
    pub sub: String,
    /// Issuer.
    pub iss: String,
    /// Expiration time.
    pub exp: i64,
}

// ============================================================================
// JWKS Client and JWT Validation
// ============================================================================

/// JWKS (JSON Web Key Set) response structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwks {
    /// List of JWK keys.
    pub keys: Vec<Jwk>,
}

/// Single JSON Web Key.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type (e.g., "RSA").
    pub kty: String,
    /// Key ID.
    pub kid: Option<String>,
    /// RSA public key modulus (base64url encoded).
    pub n: Option<String>,
    /// RSA public key exponent (base64url encoded).
    pub e: Option<String>,
}

/// Cached signing keys.
pub struct JwksCache {
    client: reqwest::Client,
    keys: HashMap<String, DecodingKey>,
    default_key: Option<DecodingKey>,
    last_updated: Option<Instant>,
}

impl JwksCache {
    /// An empty cache; the first validation fetches keys.
    #[must_use]
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(JWKS_FETCH_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            keys: HashMap::new(),
            default_key: None,
            last_updated: None,
        }
    }

    fn is_expired(&self) -> bool {
        self.last_updated
            .map_or(true, |at| at.elapsed() >= JWKS_CACHE_DURATION)
    }

    fn lookup(&self, kid: Option<&str>) -> Option<DecodingKey> {
        match kid {
            Some(kid) => self.keys.get(kid).cloned(),
            None => self.default_key.clone(),
        }
    }

    fn replace(&mut self, jwks: &Jwks) {
        self.keys.clear();
        self.default_key = None;
        self.last_updated = Some(Instant::now());

        for jwk in &jwks.keys {
            if let Some(decoding_key) = jwk_to_decoding_key(jwk) {
                if let Some(kid) = &jwk.kid {
                    self.keys.insert(kid.clone(), decoding_key.clone());
                }
                if self.default_key.is_none() {
                    self.default_key = Some(decoding_key);
                }
            }
        }
    }
}

impl Default for JwksCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a JWT against the issuer's JWKS.
async fn validate_jwt(token: &str, state: &AppState) -> Result<JwtClaims, ApiError> {
    let issuer = state.config.identity_issuer_url.as_deref().ok_or_else(|| {
        tracing::warn!("IDENTITY_ISSUER_URL not configured - rejecting session token");
        ApiError::Unauthorized
    })?;

    let header = decode_header(token).map_err(|e| {
        tracing::debug!(error = %e, "Failed to decode JWT header");
        ApiError::Unauthorized
    })?;

    let decoding_key = get_decoding_key(header.kid.as_deref(), issuer, state).await?;

    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_issuer(&[issuer]);
    // Session tokens carry no audience.
    validation.validate_aud = false;

    let token_data = decode::<JwtClaims>(token, &decoding_key, &validation).map_err(|e| {
        tracing::debug!(error = %e, "JWT validation failed");
        ApiError::Unauthorized
    })?;

    Ok(token_data.claims)
}

/// Get a decoding key from cache or fetch from JWKS endpoint.
async fn get_decoding_key(
    kid: Option<&str>,
    issuer: &str,
    state: &AppState,
) -> Result<DecodingKey, ApiError> {
    {
        let cache = state.jwks.read().await;
        if !cache.is_expired() {
            if let Some(key) = cache.lookup(kid) {
                return Ok(key);
            }
        }
    }

    let client = state.jwks.read().await.client.clone();
    let jwks = fetch_jwks(&client, issuer).await?;

    let mut cache = state.jwks.write().await;
    cache.replace(&jwks);
    cache.lookup(kid).ok_or(ApiError::Unauthorized)
}

/// Fetch JWKS from the issuer.
async fn fetch_jwks(client: &reqwest::Client, issuer: &str) -> Result<Jwks, ApiError> {
    let jwks_url = format!("{issuer}/.well-known/jwks.json");

    tracing::debug!(url = %jwks_url, "Fetching JWKS");

    let response = client.get(&jwks_url).send().await.map_err(|e| {
        tracing::error!(error = %e, url = %jwks_url, "Failed to fetch JWKS");
        ApiError::ExternalService("Failed to fetch authentication keys".into())
    })?;

    if !response.status().is_success() {
        tracing::error!(
            status = %response.status(),
            url = %jwks_url,
            "JWKS fetch returned non-success status"
        );
        return Err(ApiError::ExternalService(
            "Failed to fetch authentication keys".into(),
        ));
    }

    let jwks: Jwks = response.json().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to parse JWKS response");
        ApiError::ExternalService("Failed to parse authentication keys".into())
    })?;

    tracing::info!(keys_count = %jwks.keys.len(), "JWKS fetched successfully");

    Ok(jwks)
}

/// Convert a JWK to a `DecodingKey`.
fn jwk_to_decoding_key(jwk: &Jwk) -> Option<DecodingKey> {
    if jwk.kty != "RSA" {
        tracing::debug!(kty = %jwk.kty, "Skipping non-RSA JWK");
        return None;
    }

    let n = jwk.n.as_ref()?;
    let e = jwk.e.as_ref()?;

    DecodingKey::from_rsa_components(n, e).ok()
}
