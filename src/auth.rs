//! Enlighten cloud authentication and local bearer-token lifecycle
//!
//! Newer Envoy firmware requires a JWT obtained from the Enphase cloud: a
//! form login against Enlighten yields a session id, which Entrez exchanges
//! for a long-lived web token bound to the gateway serial. The token is held
//! behind a lock with thread-safe getters and refreshed by a background task
//! one hour before expiry.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::AuthError;

const ENLIGHTEN_LOGIN_URL: &str = "https://enlighten.enphaseenergy.com/login/login.json?";
const ENTREZ_TOKEN_URL: &str = "https://entrez.enphaseenergy.com/tokens";

/// Fallback token lifetime when the endpoint returns a raw token body
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 24 * 60 * 60;
/// Refresh this long before the token expires
const REFRESH_MARGIN_SECS: i64 = 60 * 60;
/// Retry cadence after a failed or overdue refresh
const RETRY_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Deserialize)]
struct LoginResponse {
    message: String,
    #[serde(default)]
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: String,
    #[serde(default)]
    expires_at: i64,
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    session_id: &'a str,
    serial_num: &'a str,
    username: &'a str,
}

#[derive(Debug, Default)]
struct TokenState {
    token: String,
    expires_at: i64,
}

/// Holds the current bearer token and refreshes it against the cloud.
pub struct TokenManager {
    http: reqwest::Client,
    username: String,
    password: String,
    serial: String,
    state: RwLock<TokenState>,
}

impl TokenManager {
    /// Create a manager for the given Enlighten account and gateway serial.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(username: &str, password: &str, serial: &str) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            username: username.to_string(),
            password: password.to_string(),
            serial: serial.to_string(),
            state: RwLock::new(TokenState::default()),
        })
    }

    /// The current bearer token; empty before the first successful refresh.
    pub fn token(&self) -> String {
        self.state.read().expect("RwLock poisoned").token.clone()
    }

    /// Unix timestamp at which the current token expires.
    pub fn expires_at(&self) -> i64 {
        self.state.read().expect("RwLock poisoned").expires_at
    }

    /// Perform a full login and token exchange, storing the result.
    pub async fn refresh(&self) -> Result<(), AuthError> {
        let login = self
            .http
            .post(ENLIGHTEN_LOGIN_URL)
            .form(&[
                ("user[email]", self.username.as_str()),
                ("user[password]", self.password.as_str()),
            ])
            .send()
            .await?
            .json::<LoginResponse>()
            .await
            .map_err(|e| AuthError::Decode(e.to_string()))?;

        if login.message != "success" {
            return Err(AuthError::LoginRejected(login.message));
        }

        let request = TokenRequest {
            session_id: &login.session_id,
            serial_num: &self.serial,
            username: &self.username,
        };

        let body = self
            .http
            .post(ENTREZ_TOKEN_URL)
            .json(&request)
            .send()
            .await?
            .text()
            .await?;

        // The endpoint returns either a JSON TokenResponse or the bare token
        let (token, expires_at) = match serde_json::from_str::<TokenResponse>(&body) {
            Ok(parsed) if !parsed.token.is_empty() => (parsed.token, parsed.expires_at),
            _ => {
                let raw = body.trim().to_string();
                if raw.is_empty() {
                    return Err(AuthError::EmptyToken);
                }
                (raw, Utc::now().timestamp() + DEFAULT_TOKEN_LIFETIME_SECS)
            }
        };

        {
            let mut state = self.state.write().expect("RwLock poisoned");
            state.token = token;
            state.expires_at = expires_at;
        }

        info!(expires_at, "Token refreshed");
        Ok(())
    }

    /// Spawn the background refresh loop as a detached task.
    pub fn spawn_refresh_loop(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let refresh_at = manager.expires_at() - REFRESH_MARGIN_SECS;
                let wait = refresh_at - Utc::now().timestamp();
                let sleep = if wait > 0 {
                    Duration::from_secs(wait as u64)
                } else {
                    RETRY_INTERVAL
                };
                tokio::time::sleep(sleep).await;

                if let Err(e) = manager.refresh().await {
                    error!(error = %e, "Failed to refresh token, retrying later");
                    tokio::time::sleep(RETRY_INTERVAL).await;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manager_starts_without_token() {
        let manager = TokenManager::new("user@example.com", "secret", "122001001234")
            .expect("client build failed");
        assert!(manager.token().is_empty());
        assert_eq!(manager.expires_at(), 0);
    }

    #[test]
    fn test_token_response_fallbacks() {
        // JSON with token field
        let parsed: TokenResponse =
            serde_json::from_str(r#"{"token": "abc", "expires_at": 123}"#).unwrap();
        assert_eq!(parsed.token, "abc");
        assert_eq!(parsed.expires_at, 123);

        // A raw JWT body is not valid JSON and falls through to raw handling
        assert!(serde_json::from_str::<TokenResponse>("eyJhbGciOi...").is_err());
    }
}
