//! OAuth client credentials and access-token refresh.
//!
//! Client id/secret live in the OS keyring under `<provider>_client_id`
//! and `<provider>_client_secret`. Per-connection tokens live in the
//! database, not the keyring.

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::ProviderKind;
use crate::error::OAuthError;

/// Seconds before `expires_at` at which a token already counts as expired.
pub const EXPIRY_SKEW_SECS: i64 = 60;

/// Thin wrapper around the OS keyring for credential storage.
pub mod keyring_store {
    use crate::error::OAuthError;

    const SERVICE: &str = "pianodesk";

    fn entry(key: &str) -> Result<keyring::Entry, OAuthError> {
        keyring::Entry::new(SERVICE, key).map_err(|e| OAuthError::Keyring(e.to_string()))
    }

    pub fn get(key: &str) -> Result<Option<String>, OAuthError> {
        match entry(key)?.get_password() {
            Ok(pw) => Ok(Some(pw)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(OAuthError::Keyring(e.to_string())),
        }
    }

    pub fn set(key: &str, value: &str) -> Result<(), OAuthError> {
        entry(key)?
            .set_password(value)
            .map_err(|e| OAuthError::Keyring(e.to_string()))
    }

    pub fn delete(key: &str) -> Result<(), OAuthError> {
        match entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(OAuthError::Keyring(e.to_string())),
        }
    }
}

/// Whether a token expiring at `expires_at` must be refreshed at `now`.
/// Tokens without an expiry never are.
pub fn is_expired(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match expires_at {
        Some(exp) => now > exp - Duration::seconds(EXPIRY_SKEW_SECS),
        None => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedTokens {
    pub access_token: String,
    /// Providers may rotate the refresh token; otherwise the old one.
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    error: Option<String>,
    error_description: Option<String>,
}

/// An OAuth application registered with one provider.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: Client,
    client_id: String,
    client_secret: String,
    token_url: String,
}

impl OAuthClient {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        Self {
            http: Client::new(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url: token_url.into(),
        }
    }

    /// Load client credentials for `provider` from the keyring.
    /// `Ok(None)` when they were never stored.
    pub fn from_keyring(
        provider: ProviderKind,
        token_url: impl Into<String>,
    ) -> Result<Option<Self>, OAuthError> {
        let id = keyring_store::get(&format!("{provider}_client_id"))?;
        let secret = keyring_store::get(&format!("{provider}_client_secret"))?;
        Ok(match (id, secret) {
            (Some(id), Some(secret)) => Some(Self::new(id, secret, token_url)),
            _ => None,
        })
    }

    /// Persist client credentials for `provider` to the keyring.
    pub fn store_credentials(
        provider: ProviderKind,
        client_id: &str,
        client_secret: &str,
    ) -> Result<(), OAuthError> {
        keyring_store::set(&format!("{provider}_client_id"), client_id)?;
        keyring_store::set(&format!("{provider}_client_secret"), client_secret)?;
        Ok(())
    }

    pub fn clear_credentials(provider: ProviderKind) -> Result<(), OAuthError> {
        keyring_store::delete(&format!("{provider}_client_id"))?;
        keyring_store::delete(&format!("{provider}_client_secret"))
    }

    pub fn has_credentials(provider: ProviderKind) -> Result<bool, OAuthError> {
        Ok(keyring_store::get(&format!("{provider}_client_id"))?.is_some())
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// `grant_type=refresh_token` exchange against the token endpoint.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        now: DateTime<Utc>,
    ) -> Result<RefreshedTokens, OAuthError> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let resp = self
            .http
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| OAuthError::TokenRefreshFailed(e.to_string()))?;
        let status = resp.status();
        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| OAuthError::TokenRefreshFailed(e.to_string()))?;

        if let Some(error) = body.error {
            let detail = body.error_description.unwrap_or_default();
            return Err(OAuthError::TokenRefreshFailed(
                format!("{error} {detail}").trim_end().to_string(),
            ));
        }
        if !status.is_success() {
            return Err(OAuthError::TokenRefreshFailed(format!("HTTP {status}")));
        }
        let access_token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| OAuthError::TokenRefreshFailed("missing access_token".into()))?;

        Ok(RefreshedTokens {
            access_token,
            refresh_token: body
                .refresh_token
                .or_else(|| Some(refresh_token.to_string())),
            expires_at: body.expires_in.map(|secs| now + Duration::seconds(secs)),
        })
    }
}
