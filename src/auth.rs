//! Connection authentication.
//!
//! A connection starts as a [`Handshake`] holding whatever credential the
//! client presented. [`Authenticator::authenticate`] consumes it and yields the
//! [`Identity`] the session is bound to for its whole lifetime.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use chrono::Utc;
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ChatError;
use crate::store::{ChatStore, UserLookup};
use crate::types::{Identity, UserId};

/// Access tokens live for five minutes.
pub const ACCESS_TOKEN_TTL_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    #[serde(default)]
    pub email: String,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    fn lookup(&self) -> UserLookup {
        if self.email.is_empty() {
            UserLookup::Id(UserId(self.sub))
        } else {
            UserLookup::Email(self.email.clone())
        }
    }
}

/// Issue an HS256 access token for `user`.
pub fn issue_access_token(
    secret: &[u8],
    user: &Identity,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user.id.0,
        email: user.email.clone(),
        kind: TokenKind::Access,
        iat: now,
        exp: now + ACCESS_TOKEN_TTL_SECS,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
}

// ═══════════════════════════════════════════════════════════════
// Handshake
// ═══════════════════════════════════════════════════════════════

/// An accepted but not yet authenticated connection.
#[derive(Debug, Default)]
pub struct Handshake {
    credential: Option<String>,
}

impl Handshake {
    /// The `Authorization` header wins; `?token=` is the fallback for clients
    /// that cannot set headers on a WebSocket upgrade.
    pub fn from_parts(headers: &HeaderMap, query_token: Option<String>) -> Self {
        let header = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let credential = header.or_else(|| query_token.map(|t| format!("Bearer {t}")));
        Self { credential }
    }

    pub fn with_credential(credential: impl Into<String>) -> Self {
        Self {
            credential: Some(credential.into()),
        }
    }
}

/// Split `Bearer <token>`; anything else is malformed.
pub fn extract_bearer(raw: &str) -> Result<&str, ChatError> {
    let mut parts = raw.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) if !token.is_empty() => Ok(token),
        _ => Err(ChatError::InvalidCredential("expected 'Bearer <token>'".into())),
    }
}

// ═══════════════════════════════════════════════════════════════
// Identity resolution
// ═══════════════════════════════════════════════════════════════

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Check signature and expiry and return the claims.
    fn verify(&self, token: &str) -> Result<Claims, ChatError>;

    async fn lookup(&self, lookup: &UserLookup) -> Result<Option<Identity>, ChatError>;
}

/// HS256 tokens checked against the user table in the store.
pub struct JwtResolver {
    key: DecodingKey,
    validation: Validation,
    store: Arc<dyn ChatStore>,
}

impl JwtResolver {
    pub fn new(secret: &[u8], store: Arc<dyn ChatStore>) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
            store,
        }
    }
}

#[async_trait]
impl IdentityResolver for JwtResolver {
    fn verify(&self, token: &str) -> Result<Claims, ChatError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            let reason = match e.kind() {
                JwtErrorKind::ExpiredSignature => "token expired".to_string(),
                _ => format!("token rejected: {e}"),
            };
            ChatError::InvalidCredential(reason)
        })?;
        if data.claims.kind != TokenKind::Access {
            return Err(ChatError::InvalidCredential("not an access token".into()));
        }
        Ok(data.claims)
    }

    async fn lookup(&self, lookup: &UserLookup) -> Result<Option<Identity>, ChatError> {
        self.store.find_user(lookup).await
    }
}

#[derive(Clone)]
pub struct Authenticator {
    resolver: Arc<dyn IdentityResolver>,
}

impl Authenticator {
    pub fn new(resolver: Arc<dyn IdentityResolver>) -> Self {
        Self { resolver }
    }

    pub async fn authenticate(&self, handshake: Handshake) -> Result<Identity, ChatError> {
        let raw = handshake.credential.ok_or(ChatError::Unauthenticated)?;
        let token = extract_bearer(&raw)?;
        let claims = self.resolver.verify(token)?;
        let identity = self
            .resolver
            .lookup(&claims.lookup())
            .await?
            .ok_or(ChatError::UnknownIdentity)?;
        debug!(user_id = %identity.id, "credential accepted");
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use axum::http::HeaderValue;

    const SECRET: &[u8] = b"test-secret";

    async fn setup() -> (Authenticator, Identity) {
        let store = Arc::new(MemoryStore::new());
        let alice = store.insert_user("alice", "alice@example.com").await;
        let resolver = JwtResolver::new(SECRET, store);
        (Authenticator::new(Arc::new(resolver)), alice)
    }

    fn token_with(claims: &Claims) -> String {
        encode(&Header::default(), claims, &EncodingKey::from_secret(SECRET)).unwrap()
    }

    #[test]
    fn bearer_parsing() {
        assert_eq!(extract_bearer("Bearer abc").unwrap(), "abc");
        assert!(extract_bearer("Basic abc").is_err());
        assert!(extract_bearer("Bearer").is_err());
        assert!(extract_bearer("Bearer a b").is_err());
    }

    #[test]
    fn header_takes_precedence_over_query() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        let hs = Handshake::from_parts(&headers, Some("from-query".into()));
        assert_eq!(hs.credential.as_deref(), Some("Bearer from-header"));

        let hs = Handshake::from_parts(&HeaderMap::new(), Some("from-query".into()));
        assert_eq!(hs.credential.as_deref(), Some("Bearer from-query"));

        assert!(Handshake::from_parts(&HeaderMap::new(), None).credential.is_none());
    }

    #[tokio::test]
    async fn missing_credential_is_unauthenticated() {
        let (auth, _) = setup().await;
        let err = auth.authenticate(Handshake::default()).await.unwrap_err();
        assert!(matches!(err, ChatError::Unauthenticated));
    }

    #[tokio::test]
    async fn valid_token_resolves_identity() {
        let (auth, alice) = setup().await;
        let token = issue_access_token(SECRET, &alice).unwrap();
        let identity = auth
            .authenticate(Handshake::with_credential(format!("Bearer {token}")))
            .await
            .unwrap();
        assert_eq!(identity, alice);
    }

    #[tokio::test]
    async fn forged_expired_and_refresh_tokens_are_rejected() {
        let (auth, alice) = setup().await;

        let forged = issue_access_token(b"other-secret", &alice).unwrap();
        let now = Utc::now().timestamp();
        let expired = token_with(&Claims {
            sub: alice.id.0,
            email: alice.email.clone(),
            kind: TokenKind::Access,
            iat: now - 7200,
            exp: now - 3600,
        });
        let refresh = token_with(&Claims {
            sub: alice.id.0,
            email: alice.email.clone(),
            kind: TokenKind::Refresh,
            iat: now,
            exp: now + 3600,
        });

        for token in [forged, expired, refresh, "garbage".to_string()] {
            let err = auth
                .authenticate(Handshake::with_credential(format!("Bearer {token}")))
                .await
                .unwrap_err();
            assert!(matches!(err, ChatError::InvalidCredential(_)), "{err}");
        }
    }

    #[tokio::test]
    async fn token_for_unknown_user_is_rejected() {
        let (auth, _) = setup().await;
        let ghost = Identity {
            id: UserId(77),
            nickname: "ghost".into(),
            email: "ghost@example.com".into(),
        };
        let token = issue_access_token(SECRET, &ghost).unwrap();
        let err = auth
            .authenticate(Handshake::with_credential(format!("Bearer {token}")))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::UnknownIdentity));
    }
}
