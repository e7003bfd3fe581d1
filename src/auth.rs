use crate::config::AuthConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::{header, request::Parts, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// The authenticated principal, extracted from a verified bearer token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub username: String,
    pub email: String,
    /// Subject claim; partitions all storage and queries.
    pub sub: String,
}

/// Why a request could not be authenticated. All variants map to 401 with a
/// `WWW-Authenticate: Bearer` challenge; the distinction stays in logs.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("token key id not found in key set")]
    UnknownKeyId,
    #[error("token validation failed")]
    InvalidToken(#[source] jsonwebtoken::errors::Error),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        warn!(error = %self, "Rejecting unauthenticated request");
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Bearer")],
            Json(serde_json::json!({
                "error": "Could not validate credentials",
                "code": "UNAUTHORIZED"
            })),
        )
            .into_response()
    }
}

/// Claims consumed from the identity provider's tokens.
#[derive(Debug, Deserialize)]
struct TokenClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    /// Cognito puts the sign-in name here on id tokens.
    #[serde(rename = "cognito:username", default)]
    cognito_username: Option<String>,
    /// Access tokens carry a plain `username` claim instead.
    #[serde(default)]
    username: Option<String>,
}

/// Verifies bearer tokens against the identity provider's published key set.
///
/// The JWKS is fetched once at process start; key rotation requires a
/// restart, matching the behavior of the system this replaces.
pub struct TokenVerifier {
    keys: JwkSet,
    validation: Validation,
}

impl TokenVerifier {
    /// Fetch the key set and build a verifier for the configured pool.
    pub async fn from_config(config: &AuthConfig) -> Result<Self> {
        let jwks_url = config.jwks_url();

        let keys: JwkSet = reqwest::get(&jwks_url)
            .await
            .context("Failed to fetch JWKS")?
            .error_for_status()
            .context("JWKS endpoint returned an error status")?
            .json()
            .await
            .context("Failed to decode JWKS")?;

        info!(jwks_url = %jwks_url, key_count = keys.keys.len(), "Fetched identity key set");

        Ok(Self::with_keys(keys, config))
    }

    /// Build a verifier from an already-fetched key set.
    pub fn with_keys(keys: JwkSet, config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&config.client_id]);
        validation.set_issuer(&[config.issuer()]);

        Self { keys, validation }
    }

    /// Verify a bearer token and extract the principal.
    pub fn verify(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        let header = decode_header(token).map_err(AuthError::InvalidToken)?;
        let kid = header.kid.ok_or(AuthError::UnknownKeyId)?;

        let jwk = self.keys.find(&kid).ok_or(AuthError::UnknownKeyId)?;
        let key = DecodingKey::from_jwk(jwk).map_err(AuthError::InvalidToken)?;

        let data = decode::<TokenClaims>(token, &key, &self.validation)
            .map_err(AuthError::InvalidToken)?;

        let claims = data.claims;
        let username = claims
            .cognito_username
            .or(claims.username)
            .unwrap_or_default();

        debug!(sub = %claims.sub, "Token verified");

        Ok(AuthenticatedUser {
            username,
            email: claims.email.unwrap_or_default(),
            sub: claims.sub,
        })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Arc<TokenVerifier>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(AuthError::MissingToken)?;

        let verifier = Arc::<TokenVerifier>::from_ref(state);
        verifier.verify(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig {
            user_pool_id: "us-east-1_test".to_string(),
            client_id: "client-id".to_string(),
            region: "us-east-1".to_string(),
        }
    }

    #[test]
    fn test_verifier_rejects_garbage_token() {
        let verifier = TokenVerifier::with_keys(JwkSet { keys: vec![] }, &config());
        assert!(matches!(
            verifier.verify("not.a.token"),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_verifier_rejects_unknown_kid() {
        // Unsigned-but-well-formed header with a kid no key set contains.
        // header: {"alg":"RS256","kid":"missing"} payload: {} signature: none
        let token = concat!(
            "eyJhbGciOiJSUzI1NiIsImtpZCI6Im1pc3NpbmcifQ.",
            "e30.",
            "c2ln"
        );
        let verifier = TokenVerifier::with_keys(JwkSet { keys: vec![] }, &config());
        assert!(matches!(
            verifier.verify(token),
            Err(AuthError::UnknownKeyId)
        ));
    }

    #[test]
    fn test_claims_username_fallback() {
        let claims: TokenClaims = serde_json::from_str(
            r#"{"sub":"s1","username":"fallback","email":"a@b.c"}"#,
        )
        .unwrap();
        assert_eq!(claims.cognito_username.or(claims.username).unwrap(), "fallback");

        let claims: TokenClaims = serde_json::from_str(
            r#"{"sub":"s1","cognito:username":"primary","username":"fallback"}"#,
        )
        .unwrap();
        assert_eq!(claims.cognito_username.or(claims.username).unwrap(), "primary");
    }
}
