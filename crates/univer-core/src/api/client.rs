//! API client for the student portal backend.
//!
//! This module provides the `ApiClient` struct for making authenticated
//! requests. Every request goes through the same loop:
//!
//! - 200 returns the body
//! - 401 `session_refreshed` repeats the request (the backend already logged in again)
//! - 401 `credentials_changed` clears all stored credentials and fails
//! - any other 401 logs in with stored credentials and repeats the request
//! - 403 fails as unauthorized, any other status fails with that status
//!
//! At most three passes are made; after that the request fails with 408.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use reqwest::{header, Client};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use super::dedup::{FetchOutcome, RequestDeduplicator};
use super::error::{ApiError, ErrorKind, STATUS_TIMEOUT};
use crate::auth::{CredentialKey, CredentialStore, Credentials, SingleFlightLogin};
use crate::config::{Config, Language};

// ============================================================================
// Constants
// ============================================================================

pub(crate) const LOGIN_PATH: &str = "/auth/login";
pub(crate) const LOGOUT_PATH: &str = "/auth/logout";

/// Query parameter carrying the interface language
const LANG_PARAM: &str = "lang";

/// Passes through the authenticated request loop before giving up with 408.
const MAX_AUTH_ATTEMPTS: u32 = 3;

/// Status a refresh reports when no complete credentials are stored.
const STATUS_NO_CREDENTIALS: u16 = 401;

/// API client for the student portal.
/// Clone is cheap and clones share the cookie jar, the in-flight request
/// maps and the pending login.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    config: Config,
    store: Arc<dyn CredentialStore>,
    login: SingleFlightLogin,
    json_requests: RequestDeduplicator<Value>,
    raw_requests: RequestDeduplicator<Vec<u8>>,
}

impl ApiClient {
    /// Create a new API client backed by the given credential store
    pub fn new(config: Config, store: Arc<dyn CredentialStore>) -> Result<Self> {
        let mut builder = Client::builder()
            .cookie_store(true)
            .user_agent(concat!("univer/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        let login = SingleFlightLogin::new(
            client.clone(),
            config.endpoint(LOGIN_PATH)?,
            Arc::clone(&store),
            config.login_settle_delay,
            config.login_grace_period,
        );

        Ok(Self {
            client,
            config,
            store,
            login,
            json_requests: RequestDeduplicator::new(),
            raw_requests: RequestDeduplicator::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &dyn CredentialStore {
        self.store.as_ref()
    }

    pub(crate) fn http(&self) -> &Client {
        &self.client
    }

    // ===== Session =====

    /// Whether a password is stored, i.e. the user has logged in and not
    /// logged out since.
    pub fn check_auth(&self) -> bool {
        match self.store.get(CredentialKey::Password) {
            Ok(password) => password.is_some(),
            Err(e) => {
                warn!(error = %e, "Failed to read stored password");
                false
            }
        }
    }

    /// Log in, returning the HTTP status of the login request.
    /// Concurrent calls share a single request.
    pub async fn login(&self, credentials: Credentials) -> u16 {
        self.login.login(credentials).await
    }

    /// Log in again with stored credentials. Returns 401 when any of them
    /// is missing.
    pub async fn refresh_token(&self) -> u16 {
        match self.store.credentials() {
            Ok(Some(credentials)) => self.login.login(credentials).await,
            Ok(None) => {
                debug!("No stored credentials to refresh with");
                STATUS_NO_CREDENTIALS
            }
            Err(e) => {
                warn!(error = %e, "Failed to read stored credentials");
                STATUS_NO_CREDENTIALS
            }
        }
    }

    /// Tell the backend to end the session without waiting for it, and
    /// forget the password. Username and org id are kept for the next login.
    pub async fn logout(&self) {
        match self.config.endpoint(LOGOUT_PATH) {
            Ok(url) => {
                let request = self.client.post(url).send();
                tokio::spawn(async move {
                    if let Err(e) = request.await {
                        debug!(error = %e, "Logout request failed");
                    }
                });
            }
            Err(e) => warn!(error = %e, "Invalid logout URL"),
        }

        if let Err(e) = self.store.remove(CredentialKey::Password) {
            warn!(error = %e, "Failed to remove stored password");
        }
    }

    /// End the session and clear every stored credential.
    pub async fn force_logout(&self) {
        match self.config.endpoint(LOGOUT_PATH) {
            Ok(url) => {
                if let Err(e) = self.client.post(url).send().await {
                    debug!(error = %e, "Logout request failed");
                }
            }
            Err(e) => warn!(error = %e, "Invalid logout URL"),
        }

        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear stored credentials");
        }
        info!("Logged out, local credentials cleared");
    }

    // ===== Authenticated requests =====

    /// GET `path` and deserialize the JSON body.
    pub async fn auth_fetch<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.auth_url(path)?;
        let this = self;
        let target = &url;

        let value = self
            .run_authorized(target, move || {
                let request = this.client.get(target.clone());
                this.json_requests.fetch_once(
                    target.as_str(),
                    move || request.send(),
                    |response| response.json::<Value>(),
                )
            })
            .await?;

        serde_json::from_value(value).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    /// GET `path` and return the raw body, for file downloads.
    pub async fn auth_fetch_bytes(&self, path: &str) -> Result<Vec<u8>, ApiError> {
        let url = self.auth_url(path)?;
        let this = self;
        let target = &url;

        self.run_authorized(target, move || {
            let request = this.client.get(target.clone());
            this.raw_requests.fetch_once(
                target.as_str(),
                move || request.send(),
                |response| async move { response.bytes().await.map(|body| body.to_vec()) },
            )
        })
        .await
    }

    /// POST `body` as JSON to `path` and deserialize the JSON reply.
    /// Identical concurrent posts (same URL and body) share one request.
    pub async fn auth_post<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.auth_url(path)?;
        let payload =
            serde_json::to_string(body).map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
        let key = format!("POST {} {}", url, payload);
        let this = self;
        let target = &url;
        let payload = &payload;
        let key = key.as_str();

        let value = self
            .run_authorized(target, move || {
                let request = this
                    .client
                    .post(target.clone())
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(payload.clone());
                this.json_requests.fetch_once(
                    key,
                    move || request.send(),
                    |response| response.json::<Value>(),
                )
            })
            .await?;

        serde_json::from_value(value).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    /// Resolve `path` against the API base URL with the language set.
    fn auth_url(&self, path: &str) -> Result<Url, ApiError> {
        let mut url = self
            .config
            .endpoint(path)
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
        set_language(&mut url, self.config.language);
        Ok(url)
    }

    async fn run_authorized<T, F, Fut>(&self, url: &Url, mut attempt: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = FetchOutcome<T>>,
    {
        let mut attempts = 0;

        while attempts < MAX_AUTH_ATTEMPTS {
            let outcome = attempt().await;
            if let Some(data) = outcome.data {
                return Ok(data);
            }

            match outcome.status {
                401 => match outcome.error_kind {
                    Some(ErrorKind::SessionRefreshed) => {
                        debug!(
                            %url,
                            attempt = attempts + 1,
                            "Session refreshed by backend, retrying"
                        );
                    }
                    Some(ErrorKind::CredentialsChanged) => {
                        warn!(%url, "Credentials changed elsewhere, logging out");
                        self.force_logout().await;
                        return Err(ApiError::Unauthorized);
                    }
                    error_kind => {
                        debug!(%url, ?error_kind, "Session expired, logging in again");
                        if self.refresh_token().await == 401 {
                            warn!(%url, "Re-login rejected, logging out");
                            self.force_logout().await;
                            return Err(ApiError::Unauthorized);
                        }
                    }
                },
                403 => return Err(ApiError::Unauthorized),
                status => return Err(ApiError::Http(status)),
            }

            attempts += 1;
        }

        warn!(%url, attempts, "Retry budget exhausted");
        Err(ApiError::Http(STATUS_TIMEOUT))
    }
}

/// Set the `lang` query parameter, replacing any existing value, so the same
/// path always yields the same URL.
fn set_language(url: &mut Url, language: Language) {
    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| *name != LANG_PARAM)
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();

    url.query_pairs_mut()
        .clear()
        .extend_pairs(retained)
        .append_pair(LANG_PARAM, language.code());
}
