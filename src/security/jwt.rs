use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::config::AuthConfig;

pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub access_token_expiry_minutes: i64,
    pub leeway_seconds: u64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            access_token_expiry_minutes: 30,
            leeway_seconds: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Local user id.
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Claims {
    pub fn new(user_id: i32, expiry: DateTime<Utc>) -> Self {
        Self {
            sub: user_id.to_string(),
            exp: expiry.timestamp(),
            iat: Utc::now().timestamp(),
            jti: Uuid::new_v4().to_string(),
            username: None,
            role: None,
        }
    }

    pub fn with_username(mut self, username: String) -> Self {
        self.username = Some(username);
        self
    }

    pub fn with_role(mut self, role: String) -> Self {
        self.role = Some(role);
        self
    }

    pub fn user_id(&self) -> Result<i32> {
        self.sub
            .parse()
            .map_err(|e| anyhow!("Invalid user ID in claims: {e}"))
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() > self.exp
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Clone)]
pub struct JwtManager {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtManager {
    pub fn new(config: JwtConfig, secret: &str) -> Result<Self> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(anyhow!(
                "JWT secret must be at least {MIN_SECRET_LEN} characters"
            ));
        }
        Ok(Self {
            config,
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        })
    }

    pub fn from_secret(secret: &str) -> Result<Self> {
        Self::new(JwtConfig::default(), secret)
    }

    pub fn from_auth_config(auth: &AuthConfig) -> Result<Self> {
        Self::new(
            JwtConfig {
                access_token_expiry_minutes: auth.token_expiry_minutes,
                ..JwtConfig::default()
            },
            &auth.jwt_secret,
        )
    }

    pub fn expiry_minutes(&self) -> i64 {
        self.config.access_token_expiry_minutes
    }

    pub fn generate_access_token(&self, claims: &Claims) -> Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| anyhow!("Failed to encode access token: {e}"))
    }

    pub fn issue_for_user(&self, user_id: i32, username: &str, role: &str) -> Result<AccessToken> {
        let expiry = Utc::now() + Duration::minutes(self.config.access_token_expiry_minutes);
        let claims = Claims::new(user_id, expiry)
            .with_username(username.to_string())
            .with_role(role.to_string());

        Ok(AccessToken {
            access_token: self.generate_access_token(&claims)?,
            token_type: "bearer".into(),
            expires_in: self.config.access_token_expiry_minutes * 60,
        })
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = self.config.leeway_seconds;
        validation.set_required_spec_claims(&["exp", "sub"]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| anyhow!("Token validation failed: {e}"))
    }
}

pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .or_else(|| auth_header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_manager() -> JwtManager {
        JwtManager::from_secret("this-is-a-very-long-secret-key-for-testing-purposes-only")
            .expect("Failed to create manager")
    }

    #[test]
    fn test_issue_and_validate() {
        let manager = create_test_manager();
        let token = manager
            .issue_for_user(42, "operator", "level_2")
            .expect("Failed to issue");

        assert_eq!(token.token_type, "bearer");
        assert_eq!(token.expires_in, 30 * 60);

        let claims = manager
            .validate_token(&token.access_token)
            .expect("Validation failed");
        assert_eq!(claims.user_id().expect("Invalid user ID"), 42);
        assert_eq!(claims.username.as_deref(), Some("operator"));
        assert_eq!(claims.role.as_deref(), Some("level_2"));
        assert!(!claims.is_expired());
    }

    #[test]
    fn test_expired_token_rejected() {
        let manager = create_test_manager();
        let claims = Claims::new(1, Utc::now() - Duration::minutes(5));
        let token = manager
            .generate_access_token(&claims)
            .expect("Failed to encode");

        assert!(manager.validate_token(&token).is_err());
    }

    #[test]
    fn test_token_from_other_secret_rejected() {
        let manager = create_test_manager();
        let other = JwtManager::from_secret("another-very-long-secret-key-that-does-not-match")
            .expect("Failed to create manager");
        let token = other
            .issue_for_user(1, "admin", "admin")
            .expect("Failed to issue");

        assert!(manager.validate_token(&token.access_token).is_err());
    }

    #[test]
    fn test_short_secret_rejected() {
        assert!(JwtManager::from_secret("short").is_err());
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token("Bearer abc123"), Some("abc123"));
        assert_eq!(extract_bearer_token("bearer abc123"), Some("abc123"));
        assert_eq!(extract_bearer_token("Bearer "), None);
        assert_eq!(extract_bearer_token("Basic abc123"), None);
    }
}
