//! Identity Verification
//!
//! Validates opaque credentials issued by external auth providers
//! (Firebase, Auth0, Supabase, etc.). The server never issues credentials,
//! it only verifies them and maps them onto a stable player identity.

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::game::state::PlayerId;

/// Verified identity of a connecting player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerIdentity {
    /// Stable player identifier.
    pub player_id: PlayerId,
    /// Display name shown to other room members.
    pub display_name: String,
    /// Avatar identifier carried through to room views.
    pub avatar: String,
}

/// Identity verification errors.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// No verification backend configured on server.
    #[error("identity verification not configured")]
    NotConfigured,
    /// Credential format is invalid.
    #[error("invalid credential format")]
    InvalidFormat,
    /// Credential signature verification failed.
    #[error("invalid signature")]
    InvalidSignature,
    /// Credential has expired.
    #[error("credential expired")]
    Expired,
    /// Issuer claim doesn't match expected value.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// Audience claim doesn't match expected value.
    #[error("invalid audience")]
    InvalidAudience,
    /// Required claim is missing.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// Credential was rejected by the provider.
    #[error("credential rejected: {0}")]
    Rejected(String),
}

/// External identity collaborator: opaque credential in, identity out.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verify a credential and resolve the player identity behind it.
    async fn verify(&self, credential: &str) -> Result<PlayerIdentity, IdentityError>;
}

// =============================================================================
// JWT VERIFIER
// =============================================================================

/// JWT verifier configuration.
#[derive(Clone, Debug, Default)]
pub struct JwtConfig {
    /// Expected issuer claim ("iss"). If None, any issuer accepted.
    pub issuer: Option<String>,
    /// Expected audience claim ("aud"). If None, any audience accepted.
    pub audience: Option<String>,
    /// RS256 public key in PEM format (preferred for external providers).
    pub public_key_pem: Option<String>,
    /// HS256 secret (fallback for simple setups).
    pub secret: Option<String>,
    /// Whether to skip expiry validation (for testing only).
    pub skip_expiry: bool,
}

impl JwtConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            issuer: std::env::var("AUTH_ISSUER").ok(),
            audience: std::env::var("AUTH_AUDIENCE").ok(),
            public_key_pem: std::env::var("AUTH_PUBLIC_KEY_PEM").ok(),
            secret: std::env::var("AUTH_SECRET").ok(),
            skip_expiry: std::env::var("AUTH_SKIP_EXPIRY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    /// Check if a verification backend is configured.
    pub fn is_configured(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }
}

/// Standard JWT claims we expect from auth providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject - the user ID from the auth provider.
    pub sub: String,
    /// Expiry timestamp (Unix seconds).
    #[serde(default)]
    pub exp: u64,
    /// Issued at timestamp.
    #[serde(default)]
    pub iat: u64,
    /// Issuer (auth provider).
    #[serde(default)]
    pub iss: Option<String>,
    /// Audience.
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
    /// Optional display name claim.
    #[serde(default)]
    pub name: Option<String>,
    /// Optional avatar claim.
    #[serde(default)]
    pub avatar: Option<String>,
}

impl TokenClaims {
    /// Derive a deterministic PlayerId from the subject claim.
    ///
    /// Uses SHA256 so the same provider subject always maps to the same
    /// 16-byte id, regardless of which instance verified the credential.
    pub fn player_id(&self) -> PlayerId {
        let mut hasher = Sha256::new();
        hasher.update(b"playfield-player:");
        hasher.update(self.sub.as_bytes());
        let hash = hasher.finalize();

        let mut id = [0u8; 16];
        id.copy_from_slice(&hash[..16]);
        PlayerId::from_bytes(id)
    }
}

/// JWT-backed identity verifier.
pub struct JwtVerifier {
    config: JwtConfig,
}

impl JwtVerifier {
    /// Create a verifier from config.
    pub fn new(config: JwtConfig) -> Self {
        Self { config }
    }

    fn validate(&self, token: &str) -> Result<TokenClaims, IdentityError> {
        let config = &self.config;
        if !config.is_configured() {
            return Err(IdentityError::NotConfigured);
        }

        let algorithm = if config.public_key_pem.is_some() {
            Algorithm::RS256
        } else {
            Algorithm::HS256
        };

        let mut validation = Validation::new(algorithm);
        validation.required_spec_claims = std::collections::HashSet::new();

        if let Some(ref issuer) = config.issuer {
            validation.set_issuer(&[issuer]);
        }

        if let Some(ref audience) = config.audience {
            validation.set_audience(&[audience]);
        } else {
            validation.validate_aud = false;
        }

        if config.skip_expiry {
            validation.validate_exp = false;
        }

        let token_data: TokenData<TokenClaims> = if let Some(ref pem) = config.public_key_pem {
            let key = DecodingKey::from_rsa_pem(pem.as_bytes())
                .map_err(|e| IdentityError::Rejected(format!("invalid public key: {}", e)))?;
            decode(token, &key, &validation).map_err(map_jwt_error)?
        } else if let Some(ref secret) = config.secret {
            let key = DecodingKey::from_secret(secret.as_bytes());
            decode(token, &key, &validation).map_err(map_jwt_error)?
        } else {
            return Err(IdentityError::NotConfigured);
        };

        let claims = token_data.claims;

        if claims.sub.is_empty() {
            return Err(IdentityError::MissingClaim("sub".into()));
        }

        // Manual expiry check (in case validation was skipped)
        if !config.skip_expiry && claims.exp > 0 {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            if now > claims.exp {
                return Err(IdentityError::Expired);
            }
        }

        Ok(claims)
    }
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    async fn verify(&self, credential: &str) -> Result<PlayerIdentity, IdentityError> {
        let claims = self.validate(credential)?;
        let player_id = claims.player_id();
        Ok(PlayerIdentity {
            player_id,
            display_name: claims.name.unwrap_or_else(|| claims.sub.clone()),
            avatar: claims.avatar.unwrap_or_default(),
        })
    }
}

/// Map JWT library errors to our error type.
fn map_jwt_error(err: jsonwebtoken::errors::Error) -> IdentityError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => IdentityError::Expired,
        ErrorKind::InvalidSignature => IdentityError::InvalidSignature,
        ErrorKind::InvalidIssuer => IdentityError::InvalidIssuer,
        ErrorKind::InvalidAudience => IdentityError::InvalidAudience,
        ErrorKind::InvalidToken | ErrorKind::Base64(_) => IdentityError::InvalidFormat,
        _ => IdentityError::Rejected(err.to_string()),
    }
}

// =============================================================================
// STATIC VERIFIER (tests / local development)
// =============================================================================

/// Verifier backed by a fixed credential table. Test double.
#[derive(Default)]
pub struct StaticVerifier {
    accepted: std::collections::HashMap<String, PlayerIdentity>,
}

impl StaticVerifier {
    /// Create an empty verifier (rejects everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `credential` as `identity`.
    pub fn accept(mut self, credential: &str, identity: PlayerIdentity) -> Self {
        self.accepted.insert(credential.to_string(), identity);
        self
    }
}

#[async_trait]
impl IdentityVerifier for StaticVerifier {
    async fn verify(&self, credential: &str) -> Result<PlayerIdentity, IdentityError> {
        self.accepted
            .get(credential)
            .cloned()
            .ok_or_else(|| IdentityError::Rejected("unknown credential".into()))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn create_test_token(claims: &TokenClaims, secret: &str) -> String {
        let header = Header::new(Algorithm::HS256);
        let key = EncodingKey::from_secret(secret.as_bytes());
        encode(&header, claims, &key).unwrap()
    }

    fn test_claims() -> TokenClaims {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        TokenClaims {
            sub: "user123".into(),
            exp: now + 3600,
            iat: now,
            iss: Some("test-issuer".into()),
            aud: Some(serde_json::json!("test-audience")),
            name: Some("Tester".into()),
            avatar: None,
        }
    }

    #[tokio::test]
    async fn valid_token_resolves_identity() {
        let secret = "test-secret-key-256-bits-long!!";
        let claims = test_claims();
        let token = create_test_token(&claims, secret);

        let verifier = JwtVerifier::new(JwtConfig {
            secret: Some(secret.into()),
            ..Default::default()
        });

        let identity = verifier.verify(&token).await.unwrap();
        assert_eq!(identity.display_name, "Tester");
    }

    #[tokio::test]
    async fn expired_token_rejected() {
        let secret = "test-secret-key-256-bits-long!!";
        let mut claims = test_claims();
        claims.exp = 1;

        let token = create_test_token(&claims, secret);
        let verifier = JwtVerifier::new(JwtConfig {
            secret: Some(secret.into()),
            ..Default::default()
        });

        let result = verifier.verify(&token).await;
        assert!(matches!(result, Err(IdentityError::Expired)));
    }

    #[tokio::test]
    async fn invalid_signature_rejected() {
        let claims = test_claims();
        let token = create_test_token(&claims, "correct-secret-key-here!!!!!");

        let verifier = JwtVerifier::new(JwtConfig {
            secret: Some("wrong-secret-key-here!!!!!!".into()),
            ..Default::default()
        });

        let result = verifier.verify(&token).await;
        assert!(matches!(result, Err(IdentityError::InvalidSignature)));
    }

    #[tokio::test]
    async fn missing_sub_rejected() {
        let secret = "test-secret-key-256-bits-long!!";
        let mut claims = test_claims();
        claims.sub = String::new();

        let token = create_test_token(&claims, secret);
        let verifier = JwtVerifier::new(JwtConfig {
            secret: Some(secret.into()),
            ..Default::default()
        });

        let result = verifier.verify(&token).await;
        assert!(matches!(result, Err(IdentityError::MissingClaim(_))));
    }

    #[tokio::test]
    async fn issuer_mismatch_rejected() {
        let secret = "test-secret-key-256-bits-long!!";
        let claims = test_claims();
        let token = create_test_token(&claims, secret);

        let verifier = JwtVerifier::new(JwtConfig {
            secret: Some(secret.into()),
            issuer: Some("wrong-issuer".into()),
            ..Default::default()
        });

        let result = verifier.verify(&token).await;
        assert!(matches!(result, Err(IdentityError::InvalidIssuer)));
    }

    #[test]
    fn player_id_derivation_is_stable() {
        let claims = TokenClaims {
            sub: "user123".into(),
            exp: 0,
            iat: 0,
            iss: None,
            aud: None,
            name: None,
            avatar: None,
        };

        let id1 = claims.player_id();
        let id2 = claims.player_id();
        assert_eq!(id1, id2);

        let other = TokenClaims {
            sub: "user456".into(),
            ..claims
        };
        assert_ne!(id1, other.player_id());
    }

    #[tokio::test]
    async fn not_configured_error() {
        let verifier = JwtVerifier::new(JwtConfig::default());
        let result = verifier.verify("some.jwt.token").await;
        assert!(matches!(result, Err(IdentityError::NotConfigured)));
    }

    #[tokio::test]
    async fn static_verifier_lookup() {
        let identity = PlayerIdentity {
            player_id: PlayerId::new_v4(),
            display_name: "A".into(),
            avatar: "fox".into(),
        };
        let verifier = StaticVerifier::new().accept("tok-a", identity.clone());

        assert_eq!(verifier.verify("tok-a").await.unwrap(), identity);
        assert!(verifier.verify("tok-b").await.is_err());
    }
}
