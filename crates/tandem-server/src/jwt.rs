//! JWT-backed [`Authenticator`].
//!
//! Tokens carry `user_id`, `email` and `exp` claims, plus `iss` when an
//! issuer is configured. RS256 is used when a public key is configured,
//! HS256 with a shared secret otherwise.

use anyhow::{Context, Result};
use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tandem_core::{AuthError, Authenticator, Identity};
use tracing::{info, warn};

use crate::config::AuthConfig;

/// Secret used when nothing is configured. Development only.
pub const DEV_SECRET: &str = "dev-secret-change-in-production";

/// Access token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID.
    pub user_id: String,
    /// Email, shown to other members as the display label.
    #[serde(default)]
    pub email: String,
    /// Expiration time (Unix timestamp).
    pub exp: u64,
    /// Token issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// Verifies signed access tokens.
pub struct JwtAuthenticator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    /// HS256 with a shared secret.
    #[must_use]
    pub fn hs256(secret: &[u8], issuer: Option<&str>) -> Self {
        Self::new(DecodingKey::from_secret(secret), Algorithm::HS256, issuer)
    }

    /// RS256 with a PEM-encoded RSA public key.
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM cannot be parsed.
    pub fn rs256_pem(pem: &[u8], issuer: Option<&str>) -> Result<Self> {
        let key = DecodingKey::from_rsa_pem(pem).context("Failed to parse RSA public key")?;
        Ok(Self::new(key, Algorithm::RS256, issuer))
    }

    /// Build from the `[auth]` config section.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured public key cannot be read or parsed.
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let issuer = config.issuer.as_deref();

        if let Some(path) = &config.public_key_path {
            let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
            let pem = std::fs::read(&expanded)
                .with_context(|| format!("Failed to read public key: {}", expanded))?;
            info!(path = %expanded, "Verifying tokens with RS256");
            return Self::rs256_pem(&pem, issuer);
        }

        match &config.secret {
            Some(secret) => {
                info!("Verifying tokens with HS256");
                Ok(Self::hs256(secret.as_bytes(), issuer))
            }
            None => {
                warn!("No JWT secret configured, using the development secret");
                Ok(Self::hs256(DEV_SECRET.as_bytes(), issuer))
            }
        }
    }

    fn new(key: DecodingKey, algorithm: Algorithm, issuer: Option<&str>) -> Self {
        let mut validation = Validation::new(algorithm);
        if let Some(issuer) = issuer {
            validation.set_issuer(&[issuer]);
            validation.set_required_spec_claims(&["exp", "iss"]);
        }
        Self { key, validation }
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn authenticate(&self, credential: &str) -> Result<Identity, AuthError> {
        let data = decode::<Claims>(credential, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(e.to_string()),
            }
        })?;

        let claims = data.claims;
        if claims.user_id.is_empty() {
            return Err(AuthError::Invalid("Missing user_id claim".to_string()));
        }

        let label = if claims.email.is_empty() {
            claims.user_id.clone()
        } else {
            claims.email
        };
        Ok(Identity::new(claims.user_id, label))
    }
}
