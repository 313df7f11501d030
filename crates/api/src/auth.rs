//! Bearer-token authentication
//!
//! Session issuance lives in the identity service; this API only validates
//! the JWTs it mints and exposes the authenticated user to handlers as an
//! `AuthUser` extension.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use inkline_shared::UserId;

use crate::{error::ApiError, state::AppState};

/// Claims carried by an access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: Uuid,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

/// The authenticated caller, available to handlers via `Extension`
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: UserId,
    pub email: String,
}

pub fn verify_token(secret: &str, token: &str) -> Result<Claims, ApiError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|err| {
        tracing::debug!(error = %err, "token validation failed");
        ApiError::InvalidToken
    })
}

/// Middleware that requires a valid bearer token
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let claims = verify_token(&state.config.jwt_secret, token)?;

    request.extensions_mut().insert(AuthUser {
        user_id: UserId::from(claims.sub),
        email: claims.email,
    });

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use time::OffsetDateTime;

    const SECRET: &str = "test-secret-that-is-long-enough!";

    fn token(exp_offset_secs: i64) -> String {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = Claims {
            sub: Uuid::new_v4(),
            email: "ada@example.test".to_string(),
            iat: now,
            exp: now + exp_offset_secs,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_round_trips() {
        let claims = verify_token(SECRET, &token(3600)).unwrap();
        assert_eq!(claims.email, "ada@example.test");
    }

    #[test]
    fn expired_token_rejected() {
        assert!(matches!(
            verify_token(SECRET, &token(-3600)),
            Err(ApiError::InvalidToken)
        ));
    }

    #[test]
    fn wrong_secret_rejected() {
        assert!(matches!(
            verify_token("another-secret-that-is-also-long!", &token(3600)),
            Err(ApiError::InvalidToken)
        ));
    }
}
