//! OAuth2 JWT-bearer grant for Google service accounts.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use chrono::{Duration as ChronoDuration, Utc};
use ring::rand::SystemRandom;
use ring::signature::{RSA_PKCS1_SHA256, RsaKeyPair};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::AccessToken;
use crate::error::{Result, StoreError};

pub const SPREADSHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

#[derive(Serialize)]
struct JwtHeader<'a> {
    alg: &'a str,
    typ: &'a str,
}

#[derive(Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

const fn default_expires_in() -> i64 {
    ASSERTION_LIFETIME_SECS
}

/// A service account's signing key.
pub struct ServiceAccountKey {
    client_email: String,
    key_pair: RsaKeyPair,
}

impl ServiceAccountKey {
    /// Parse a PKCS#8 PEM private key.
    ///
    /// Secrets files often carry the key with literal `\n` sequences; both
    /// forms are accepted.
    pub fn from_pem(client_email: &str, pem: &str) -> Result<Self> {
        let der = pem_to_der(pem)?;
        let key_pair = RsaKeyPair::from_pkcs8(&der)
            .map_err(|err| StoreError::RemoteUnavailable(format!("private key rejected: {err}")))?;
        Ok(Self {
            client_email: client_email.trim().to_string(),
            key_pair,
        })
    }

    #[must_use]
    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    /// Signed RS256 assertion for `audience` (the token endpoint).
    pub fn assertion(&self, audience: &str, issued_at: i64) -> Result<String> {
        let header = JwtHeader {
            alg: "RS256",
            typ: "JWT",
        };
        let claims = JwtClaims {
            iss: &self.client_email,
            scope: SPREADSHEETS_SCOPE,
            aud: audience,
            iat: issued_at,
            exp: issued_at + ASSERTION_LIFETIME_SECS,
        };
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?)
        );

        let mut signature = vec![0; self.key_pair.public().modulus_len()];
        self.key_pair
            .sign(
                &RSA_PKCS1_SHA256,
                &SystemRandom::new(),
                signing_input.as_bytes(),
                &mut signature,
            )
            .map_err(|err| StoreError::RemoteUnavailable(format!("signing failed: {err}")))?;

        Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature)))
    }

    /// Trade a fresh assertion for an access token.
    pub fn exchange(&self, http: &reqwest::blocking::Client, token_uri: &str) -> Result<AccessToken> {
        let now = Utc::now();
        let assertion = self.assertion(token_uri, now.timestamp())?;
        let body = format!(
            "grant_type={}&assertion={}",
            urlencoding::encode(JWT_BEARER_GRANT),
            urlencoding::encode(&assertion)
        );

        debug!(client_email = %self.client_email, token_uri, "requesting access token");
        let response = http
            .post(token_uri)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .map_err(|e| StoreError::RemoteUnavailable(format!("token request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .map_err(|e| StoreError::RemoteUnavailable(format!("token response unreadable: {e}")))?;
        if !status.is_success() {
            return Err(StoreError::RemoteUnavailable(format!(
                "token endpoint returned {status}: {text}"
            )));
        }

        let token: TokenResponse = serde_json::from_str(&text)
            .map_err(|e| StoreError::RemoteUnavailable(format!("invalid token response: {e}")))?;
        Ok(AccessToken {
            token: token.access_token,
            expires_at: now + ChronoDuration::seconds(token.expires_in),
        })
    }
}

fn pem_to_der(pem: &str) -> Result<Vec<u8>> {
    let normalized = pem.replace("\\n", "\n");
    let body: String = normalized
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("-----"))
        .collect();
    if body.is_empty() {
        return Err(StoreError::RemoteUnavailable("private key is empty".into()));
    }
    STANDARD
        .decode(body)
        .map_err(|err| StoreError::RemoteUnavailable(format!("private key is not PEM: {err}")))
}
