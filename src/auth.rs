use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts, StatusCode},
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::UserId;
use crate::AppState;

/// Lifetime of a lobby join token. Deliberately tiny: the token is minted
/// by the admission API and presented on the websocket connect that
/// immediately follows.
pub const LOBBY_TOKEN_EXPIRE_SECONDS: i64 = 5;

/// Claims of the session bearer issued by the external auth service
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionClaims {
    pub sub: String,
    pub username: String,
    pub exp: usize,
}

/// Claims of a lobby join token, binding the caller to one lobby
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LobbyClaims {
    pub sub: String,
    pub username: String,
    pub lobby_name: String,
    pub exp: usize,
}

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub username: String,
}

/// Extractor for authenticated users from the Authorization header
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
    Arc<AppState>: FromRef<S>,
{
    type Rejection = StatusCode;

    fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let app_state = Arc::<AppState>::from_ref(state);

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .map(String::from);

        async move {
            let token = token.ok_or(StatusCode::UNAUTHORIZED)?;

            let token_data = decode::<SessionClaims>(
                &token,
                &DecodingKey::from_secret(app_state.config.security.secret_key.as_ref()),
                &Validation::default(),
            )
            .map_err(|_| StatusCode::UNAUTHORIZED)?;

            let user_id = token_data
                .claims
                .sub
                .parse::<UserId>()
                .map_err(|_| StatusCode::UNAUTHORIZED)?;

            Ok(AuthenticatedUser {
                user_id,
                username: token_data.claims.username,
            })
        }
    }
}

/// Mint a join token for one lobby
pub fn generate_lobby_token(
    user_id: UserId,
    username: &str,
    lobby_name: &str,
    secret_key: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let expiration = chrono::Utc::now()
        + chrono::Duration::seconds(LOBBY_TOKEN_EXPIRE_SECONDS);

    let claims = LobbyClaims {
        sub: user_id.to_string(),
        username: username.to_string(),
        lobby_name: lobby_name.to_string(),
        exp: expiration.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret_key.as_ref()),
    )
}

/// Verify a join token's signature and expiry. Zero leeway: a five second
/// lifetime would be meaningless against the default sixty.
pub fn decode_lobby_token(
    token: &str,
    secret_key: &str,
) -> Result<LobbyClaims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;

    decode::<LobbyClaims>(
        token,
        &DecodingKey::from_secret(secret_key.as_ref()),
        &validation,
    )
    .map(|data| data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn test_lobby_token_round_trip() {
        let token = generate_lobby_token(42, "alice", "duel-1", SECRET).unwrap();
        let claims = decode_lobby_token(&token, SECRET).unwrap();

        assert_eq!(claims.sub, "42");
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.lobby_name, "duel-1");
    }

    #[test]
    fn test_lobby_token_wrong_secret_rejected() {
        let token = generate_lobby_token(42, "alice", "duel-1", SECRET).unwrap();
        assert!(decode_lobby_token(&token, "other-secret").is_err());
    }

    #[test]
    fn test_expired_lobby_token_rejected() {
        let claims = LobbyClaims {
            sub: "42".to_string(),
            username: "alice".to_string(),
            lobby_name: "duel-1".to_string(),
            exp: (chrono::Utc::now() - chrono::Duration::seconds(1)).timestamp() as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_ref()),
        )
        .unwrap();

        assert!(decode_lobby_token(&token, SECRET).is_err());
    }

    #[test]
    fn test_garbage_token_rejected() {
        assert!(decode_lobby_token("not-a-jwt", SECRET).is_err());
    }
}
