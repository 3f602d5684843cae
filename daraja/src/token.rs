//! OAuth access tokens.
//!
//! The gateway issues short-lived bearer tokens through a client-credentials
//! exchange. [`TokenCache`] keeps the current token and fetches a new one once
//! it is missing or about to expire. Clones of a cache share the same slot.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_with::{DisplayFromStr, PickFirst, serde_as};
use tokio::sync::RwLock;
use url::Url;

use crate::client::endpoint_url;
use crate::error::{Error, Result};

/// Path and query of the client-credentials exchange.
pub const TOKEN_PATH: &str = "/oauth/v1/generate?grant_type=client_credentials";

/// A bearer token and the instant it stops being usable.
#[derive(Clone)]
pub struct AccessToken {
    value: String,
    expires_at: Instant,
}

impl AccessToken {
    /// Lifetime assumed when the gateway does not send `expires_in`.
    pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(3599);

    /// Tokens this close to expiry are treated as expired.
    pub const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

    /// Creates a token valid for `lifetime` from now.
    ///
    /// A lifetime past the range of [`Instant`] falls back to
    /// [`Self::DEFAULT_LIFETIME`].
    #[must_use]
    pub fn new(value: impl Into<String>, lifetime: Duration) -> Self {
        let now = Instant::now();
        let expires_at = now
            .checked_add(lifetime)
            .unwrap_or(now + Self::DEFAULT_LIFETIME);
        Self {
            value: value.into(),
            expires_at,
        }
    }

    /// The raw bearer value.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.value
    }

    /// Whether the token should be replaced before the next request.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() + Self::EXPIRY_MARGIN >= self.expires_at
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Body of a successful token response. Daraja sends `expires_in` as a string.
#[serde_as]
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Shared slot for the current access token.
///
/// Reads take a shared lock. A refresh takes the write lock and checks again
/// before fetching, so concurrent callers trigger a single exchange.
#[derive(Debug, Clone, Default)]
pub struct TokenCache {
    state: Arc<RwLock<Option<AccessToken>>>,
}

impl TokenCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached token if it is still usable.
    pub async fn get(&self) -> Option<AccessToken> {
        let guard = self.state.read().await;
        guard.as_ref().filter(|token| !token.is_expired()).cloned()
    }

    /// Stores a token.
    pub async fn set(&self, token: AccessToken) {
        *self.state.write().await = Some(token);
    }

    /// Drops the cached token.
    pub async fn clear(&self) {
        *self.state.write().await = None;
    }

    /// Returns the cached token, or runs `fetch` and caches its result.
    ///
    /// # Errors
    ///
    /// Propagates the error of `fetch`; the slot is left empty in that case.
    pub async fn get_or_refresh<F, Fut>(&self, fetch: F) -> Result<AccessToken>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AccessToken>>,
    {
        if let Some(token) = self.get().await {
            return Ok(token);
        }

        let mut guard = self.state.write().await;
        if let Some(token) = guard.as_ref().filter(|token| !token.is_expired()) {
            return Ok(token.clone());
        }

        #[cfg(feature = "telemetry")]
        tracing::debug!("daraja.token.refresh");

        *guard = None;
        let token = fetch().await?;
        *guard = Some(token.clone());
        Ok(token)
    }
}

/// Exchanges the consumer key and secret for an access token.
///
/// # Errors
///
/// Returns [`Error::Authentication`] for any non-200 response or a 200
/// response without `access_token`, and [`Error::Transport`] if the request
/// cannot be sent.
#[cfg_attr(
    feature = "telemetry",
    tracing::instrument(name = "daraja.token.fetch", skip_all, err, fields(url = %base_url))
)]
pub async fn fetch_token(
    client: &Client,
    base_url: &Url,
    key: &str,
    secret: &str,
    timeout: Option<Duration>,
) -> Result<AccessToken> {
    let context = "GET /oauth/v1/generate";
    let url = endpoint_url(base_url, TOKEN_PATH).map_err(|source| Error::UrlParse {
        context: "Failed to construct token URL",
        source,
    })?;

    let mut req = client.get(url).basic_auth(key, Some(secret));
    if let Some(timeout) = timeout {
        req = req.timeout(timeout);
    }
    let response = req
        .send()
        .await
        .map_err(|source| Error::Transport { context, source })?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|source| Error::Transport { context, source })?;

    if status != StatusCode::OK {
        return Err(Error::Authentication { status, body });
    }

    match serde_json::from_str::<TokenResponse>(&body) {
        Ok(TokenResponse {
            access_token: Some(value),
            expires_in,
        }) if !value.is_empty() => {
            let lifetime = expires_in.map_or(AccessToken::DEFAULT_LIFETIME, Duration::from_secs);
            Ok(AccessToken::new(value, lifetime))
        }
        _ => Err(Error::Authentication { status, body }),
    }
}
