use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::shared::models::UserRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub role: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    #[serde(rename = "type")]
    pub token_type: String,
}

impl Claims {
    fn new(
        user_id: Uuid,
        email: &str,
        role: &str,
        token_type: TokenType,
        expiry: DateTime<Utc>,
    ) -> Self {
        Self {
            sub: user_id.to_string(),
            email: email.to_string(),
            role: role.to_string(),
            exp: expiry.timestamp(),
            iat: Utc::now().timestamp(),
            jti: Uuid::new_v4().to_string(),
            token_type: token_type.as_str().to_string(),
        }
    }

    pub fn user_id(&self) -> Result<Uuid> {
        Uuid::parse_str(&self.sub).map_err(|e| anyhow!("Invalid user ID in claims: {e}"))
    }

    pub fn user_role(&self) -> Result<UserRole> {
        UserRole::parse(&self.role).ok_or_else(|| anyhow!("Unknown role in claims: {}", self.role))
    }

    pub fn is_access_token(&self) -> bool {
        self.token_type == TokenType::Access.as_str()
    }

    pub fn is_refresh_token(&self) -> bool {
        self.token_type == TokenType::Refresh.as_str()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Issues and validates the HS256 access/refresh token pair. Revoked token
/// ids live in an in-memory set; restarting the server clears it, which is
/// acceptable because access tokens are short-lived anyway.
pub struct TokenManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl_minutes: i64,
    refresh_ttl_days: i64,
    blacklist: Arc<RwLock<HashSet<String>>>,
}

impl TokenManager {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            access_ttl_minutes: config.access_ttl_minutes,
            refresh_ttl_days: config.refresh_ttl_days,
            blacklist: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    pub fn issue_pair(&self, user_id: Uuid, email: &str, role: &str) -> Result<TokenPair> {
        let now = Utc::now();
        let access_expiry = now + Duration::minutes(self.access_ttl_minutes);
        let refresh_expiry = now + Duration::days(self.refresh_ttl_days);

        let access_claims = Claims::new(user_id, email, role, TokenType::Access, access_expiry);
        let refresh_claims = Claims::new(user_id, email, role, TokenType::Refresh, refresh_expiry);

        let header = Header::new(Algorithm::HS256);
        let access_token = encode(&header, &access_claims, &self.encoding_key)
            .map_err(|e| anyhow!("Failed to encode access token: {e}"))?;
        let refresh_token = encode(&header, &refresh_claims, &self.encoding_key)
            .map_err(|e| anyhow!("Failed to encode refresh token: {e}"))?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".into(),
            expires_in: self.access_ttl_minutes * 60,
        })
    }

    fn validate(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 60;

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| anyhow!("Token validation failed: {e}"))
    }

    pub async fn validate_access(&self, token: &str) -> Result<Claims> {
        let claims = self.validate(token)?;
        if !claims.is_access_token() {
            return Err(anyhow!("Token is not an access token"));
        }
        if self.is_revoked(&claims.jti).await {
            return Err(anyhow!("Token has been revoked"));
        }
        Ok(claims)
    }

    pub async fn validate_refresh(&self, token: &str) -> Result<Claims> {
        let claims = self.validate(token)?;
        if !claims.is_refresh_token() {
            return Err(anyhow!("Token is not a refresh token"));
        }
        if self.is_revoked(&claims.jti).await {
            return Err(anyhow!("Refresh token has been revoked"));
        }
        Ok(claims)
    }

    /// Rotate a refresh token: the old one is revoked before the new pair is
    /// issued, so replaying it fails.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let claims = self.validate_refresh(refresh_token).await?;
        let user_id = claims.user_id()?;

        self.revoke(&claims.jti).await;

        let pair = self.issue_pair(user_id, &claims.email, &claims.role)?;
        debug!("Refreshed tokens for user {user_id}");
        Ok(pair)
    }

    pub async fn revoke(&self, jti: &str) {
        let mut blacklist = self.blacklist.write().await;
        blacklist.insert(jti.to_string());
        debug!("Revoked token {jti}");
    }

    /// Revoke whatever token string is presented, access or refresh.
    pub async fn revoke_bearer(&self, token: &str) -> Result<()> {
        let claims = self.validate(token)?;
        self.revoke(&claims.jti).await;
        Ok(())
    }

    pub async fn is_revoked(&self, jti: &str) -> bool {
        let blacklist = self.blacklist.read().await;
        blacklist.contains(jti)
    }
}

pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .or_else(|| auth_header.strip_prefix("bearer "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_manager() -> TokenManager {
        TokenManager::new(&JwtConfig {
            secret: "this-is-a-very-long-secret-key-for-testing-purposes-only".into(),
            access_ttl_minutes: 30,
            refresh_ttl_days: 14,
        })
    }

    #[test]
    fn test_issue_pair() {
        let manager = create_test_manager();
        let pair = manager
            .issue_pair(Uuid::new_v4(), "test@example.com", "learner")
            .expect("Failed to issue");

        assert!(!pair.access_token.is_empty());
        assert!(!pair.refresh_token.is_empty());
        assert_eq!(pair.token_type, "Bearer");
        assert_eq!(pair.expires_in, 30 * 60);
    }

    #[tokio::test]
    async fn test_validate_access_token() {
        let manager = create_test_manager();
        let user_id = Uuid::new_v4();

        let pair = manager
            .issue_pair(user_id, "test@example.com", "instructor")
            .expect("Failed to issue");
        let claims = manager
            .validate_access(&pair.access_token)
            .await
            .expect("Validation failed");

        assert_eq!(claims.user_id().expect("Invalid user ID"), user_id);
        assert_eq!(claims.email, "test@example.com");
        assert_eq!(claims.user_role().expect("bad role"), UserRole::Instructor);
        assert!(claims.is_access_token());
    }

    #[tokio::test]
    async fn test_wrong_token_type_rejected() {
        let manager = create_test_manager();
        let pair = manager
            .issue_pair(Uuid::new_v4(), "test@example.com", "learner")
            .expect("Failed to issue");

        assert!(manager.validate_refresh(&pair.access_token).await.is_err());
        assert!(manager.validate_access(&pair.refresh_token).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_token_rejected() {
        let manager = create_test_manager();
        assert!(manager.validate_access("invalid.token.here").await.is_err());
    }

    #[tokio::test]
    async fn test_revocation() {
        let manager = create_test_manager();
        let pair = manager
            .issue_pair(Uuid::new_v4(), "test@example.com", "learner")
            .expect("Failed to issue");

        let claims = manager
            .validate_access(&pair.access_token)
            .await
            .expect("Validation failed");
        manager.revoke(&claims.jti).await;

        assert!(manager.validate_access(&pair.access_token).await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_revokes_old() {
        let manager = create_test_manager();
        let user_id = Uuid::new_v4();
        let pair = manager
            .issue_pair(user_id, "test@example.com", "learner")
            .expect("Failed to issue");

        let new_pair = manager
            .refresh(&pair.refresh_token)
            .await
            .expect("Refresh failed");
        assert_ne!(new_pair.access_token, pair.access_token);
        assert_ne!(new_pair.refresh_token, pair.refresh_token);

        let claims = manager
            .validate_access(&new_pair.access_token)
            .await
            .expect("Validation failed");
        assert_eq!(claims.email, "test@example.com");
        assert_eq!(claims.role, "learner");

        // Replaying the rotated-out refresh token must fail.
        assert!(manager.refresh(&pair.refresh_token).await.is_err());
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token("Bearer abc123"), Some("abc123"));
        assert_eq!(extract_bearer_token("bearer abc123"), Some("abc123"));
        assert_eq!(extract_bearer_token("Basic abc123"), None);
    }
}
