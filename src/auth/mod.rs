//! Authentication against the remote spreadsheet service.
//!
//! - [`credentials`]: the secrets document that switches remote mode on
//! - [`service_account`]: JWT-bearer exchange for a service-account key
//! - [`TokenSource`]: hands out a bearer token, cached until near expiry

pub mod credentials;
pub mod service_account;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

pub use credentials::SheetsCredentials;
pub use service_account::ServiceAccountKey;

use crate::error::{Result, StoreError};

/// Tokens are renewed this long before they expire.
const EXPIRY_MARGIN_SECS: i64 = 300;

/// A bearer token and its expiry.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Check if the token is expired (with a 5-minute buffer).
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.time_remaining() < EXPIRY_MARGIN_SECS
    }

    /// Seconds until the token expires.
    #[must_use]
    pub fn time_remaining(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds()
    }
}

enum Grant {
    Static(String),
    ServiceAccount {
        key: ServiceAccountKey,
        token_uri: String,
    },
}

/// Source of bearer tokens for the Sheets client.
pub struct TokenSource {
    grant: Grant,
    cached: Mutex<Option<AccessToken>>,
}

impl TokenSource {
    /// Build from credentials; a static `access_token` wins over a key.
    pub fn from_credentials(credentials: &SheetsCredentials) -> Result<Self> {
        let grant = match credentials.access_token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => Grant::Static(token.to_string()),
            _ => {
                let email = credentials.client_email.as_deref().unwrap_or_default();
                let pem = credentials.private_key.as_deref().ok_or_else(|| {
                    StoreError::RemoteUnavailable("credentials: private_key missing".into())
                })?;
                Grant::ServiceAccount {
                    key: ServiceAccountKey::from_pem(email, pem)?,
                    token_uri: credentials.token_uri().to_string(),
                }
            }
        };
        Ok(Self {
            grant,
            cached: Mutex::new(None),
        })
    }

    /// Current bearer token, exchanging a new one when needed.
    pub fn bearer(&self, http: &reqwest::blocking::Client) -> Result<String> {
        match &self.grant {
            Grant::Static(token) => Ok(token.clone()),
            Grant::ServiceAccount { key, token_uri } => {
                let mut cached = self.cached.lock();
                if let Some(token) = cached.as_ref().filter(|t| !t.is_expired()) {
                    return Ok(token.token.clone());
                }
                let fresh = key.exchange(http, token_uri)?;
                debug!(
                    client_email = %key.client_email(),
                    expires_in = fresh.time_remaining(),
                    "access token renewed"
                );
                let token = fresh.token.clone();
                *cached = Some(fresh);
                Ok(token)
            }
        }
    }

    /// Drop the cached token, e.g. after a 401.
    pub fn invalidate(&self) {
        self.cached.lock().take();
    }
}
