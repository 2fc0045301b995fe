//! Bearer-token acquisition for the document store.
//!
//! Client-credentials grant against the identity provider. The token is
//! cached until 60 s before expiry; the cache mutex is held across the
//! refresh so only one refresh is ever in flight per worker process.

use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;

use super::UploadError;

const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub tenant: String,
    pub client_id: String,
    pub client_secret: String,
}

impl IdentityConfig {
    /// Reads `IDENTITY_TENANT`, `IDENTITY_CLIENT_ID`, `IDENTITY_CLIENT_SECRET`.
    /// Returns None when any of them is missing.
    pub fn from_env() -> Option<Self> {
        let tenant = std::env::var("IDENTITY_TENANT").ok()?;
        let client_id = std::env::var("IDENTITY_CLIENT_ID").ok()?;
        let client_secret = std::env::var("IDENTITY_CLIENT_SECRET").ok()?;
        Some(Self { tenant, client_id, client_secret })
    }

    fn token_url(&self) -> String {
        format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            self.tenant
        )
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

pub struct TokenCache {
    config: IdentityConfig,
    client: reqwest::Client,
    state: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(config: IdentityConfig, client: reqwest::Client) -> Self {
        Self {
            config,
            client,
            state: Mutex::new(None),
        }
    }

    /// Returns a valid bearer token, refreshing when the cached one is
    /// within 60 s of expiry.
    pub async fn bearer_token(&self) -> Result<String, UploadError> {
        let mut state = self.state.lock().await;
        if let Some(cached) = state.as_ref() {
            if cached.expires_at > Instant::now() + EXPIRY_MARGIN {
                return Ok(cached.token.clone());
            }
        }

        let fresh = self.request_token().await?;
        let token = fresh.token.clone();
        *state = Some(fresh);
        Ok(token)
    }

    /// Drops the cached token. Called after the store answers 401 so the
    /// next request runs a fresh grant.
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        *state = None;
    }

    async fn request_token(&self) -> Result<CachedToken, UploadError> {
        tracing::debug!("Requesting bearer token from identity provider");

        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("scope", "https://graph.microsoft.com/.default"),
            ("grant_type", "client_credentials"),
        ];

        let response = self
            .client
            .post(self.config.token_url())
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let code = response.status().as_u16();
            let detail = response.text().await.unwrap_or_default();
            return Err(UploadError::Auth(format!(
                "Token acquisition failed: HTTP {} - {}",
                code, detail
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| UploadError::Auth(format!("Malformed token response: {}", e)))?;

        Ok(CachedToken {
            token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        })
    }
}
