//! Bearer-token verification: an `AuthContext` of `{team_id, user_id}` is
//! required on every authenticated route (spec.md §6). Team/user provisioning
//! and the identity provider behind the token are explicit external
//! collaborators (spec.md §1 Non-goals); this module only specifies and
//! defaults the verifier, the way the teacher's `auth::jwt`/`auth::middleware`
//! pair specifies JWT handling behind a pluggable `ApiKeyStore`.

use std::sync::Arc;

use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::{async_trait, Json};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::domain::TeamId;

/// Identity attached to a request once a bearer token has been verified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    pub team_id: String,
    pub user_id: String,
}

impl AuthContext {
    pub fn team(&self) -> TeamId {
        TeamId::new(self.team_id.clone())
    }
}

/// Verifies an opaque bearer token into `{team_id, user_id}`. A deployment
/// can swap in its own implementation (backed by its IAM) without touching
/// any handler; [`JwtVerifier`] is the default used when none is configured.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, bearer: &str) -> Result<AuthContext, VerifyError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyError {
    Missing,
    Invalid,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    sub: String,
    team_id: String,
    exp: i64,
    iat: i64,
}

/// HS256 JWT verifier keyed on `HiveConfig.jwt_secret`; also issues tokens so
/// tests and the `dev` CLI path can mint credentials without a real IdP.
pub struct JwtVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn issue(&self, team_id: &str, user_id: &str, ttl: Duration) -> String {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            team_id: team_id.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .expect("HS256 encoding with an in-memory secret never fails")
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, bearer: &str) -> Result<AuthContext, VerifyError> {
        let data = decode::<Claims>(bearer, &self.decoding_key, &self.validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => VerifyError::Expired,
                _ => VerifyError::Invalid,
            }
        })?;
        Ok(AuthContext { team_id: data.claims.team_id, user_id: data.claims.sub })
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?.strip_prefix("Bearer ")
}

/// Axum middleware: rejects requests without a valid bearer token, otherwise
/// inserts [`AuthContext`] into request extensions for handlers/extractors.
pub async fn require_auth(
    State(verifier): State<Arc<dyn TokenVerifier>>,
    headers: HeaderMap,
    mut request: axum::extract::Request,
    next: Next,
) -> Result<Response, AuthRejection> {
    let token = bearer_token(&headers).ok_or(AuthRejection(VerifyError::Missing))?;
    let context = verifier.verify(token).await.map_err(AuthRejection)?;
    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

#[derive(Debug)]
pub struct AuthRejection(VerifyError);

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let message = match self.0 {
            VerifyError::Missing => "missing bearer token",
            VerifyError::Invalid => "invalid bearer token",
            VerifyError::Expired => "bearer token expired",
        };
        (StatusCode::UNAUTHORIZED, Json(serde_json::json!({"error": "unauthorized", "message": message})))
            .into_response()
    }
}

/// Lets handlers take `AuthContext` directly as an argument once
/// [`require_auth`] has run for the route.
#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<AuthContext>().cloned().ok_or(AuthRejection(VerifyError::Missing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_minted_token() {
        let verifier = JwtVerifier::new("test-secret");
        let token = verifier.issue("acme", "user-1", Duration::minutes(5));
        let context = verifier.verify(&token).await.unwrap();
        assert_eq!(context.team_id, "acme");
        assert_eq!(context.user_id, "user-1");
    }

    #[tokio::test]
    async fn rejects_token_signed_with_a_different_secret() {
        let issuer = JwtVerifier::new("secret-a");
        let verifier = JwtVerifier::new("secret-b");
        let token = issuer.issue("acme", "user-1", Duration::minutes(5));
        assert_eq!(verifier.verify(&token).await.unwrap_err(), VerifyError::Invalid);
    }

    #[tokio::test]
    async fn rejects_expired_token() {
        let verifier = JwtVerifier::new("test-secret");
        let token = verifier.issue("acme", "user-1", Duration::seconds(-10));
        assert_eq!(verifier.verify(&token).await.unwrap_err(), VerifyError::Expired);
    }

    #[test]
    fn bearer_token_strips_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer abc.def.ghi".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));
    }

    #[test]
    fn bearer_token_rejects_other_schemes() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "ApiKey abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }
}
