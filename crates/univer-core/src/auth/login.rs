//! Single-flight login.
//!
//! At most one login request is outstanding per client. Callers arriving while
//! one is pending, or within the grace window after it settled, get its status
//! instead of starting their own.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Client;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use super::credentials::{CredentialStore, Credentials};
use crate::api::error::STATUS_UNREACHABLE;

type PendingLogin = Shared<BoxFuture<'static, u16>>;

#[derive(Clone)]
pub struct SingleFlightLogin {
    client: Client,
    login_url: Url,
    store: Arc<dyn CredentialStore>,
    settle_delay: Duration,
    grace_period: Duration,
    pending: Arc<Mutex<Option<PendingLogin>>>,
}

impl SingleFlightLogin {
    pub fn new(
        client: Client,
        login_url: Url,
        store: Arc<dyn CredentialStore>,
        settle_delay: Duration,
        grace_period: Duration,
    ) -> Self {
        Self {
            client,
            login_url,
            store,
            settle_delay,
            grace_period,
            pending: Arc::new(Mutex::new(None)),
        }
    }

    /// Log in and return the HTTP status of the login request.
    ///
    /// A status of 404 means the backend could not be reached. Transport
    /// errors are never returned as errors.
    pub async fn login(&self, credentials: Credentials) -> u16 {
        let attempt = {
            let mut slot = self.pending.lock().await;
            match slot.as_ref() {
                Some(pending) => {
                    debug!("Joining pending login");
                    pending.clone()
                }
                None => {
                    let attempt = self.start(credentials);
                    *slot = Some(attempt.clone());
                    attempt
                }
            }
        };

        attempt.await
    }

    /// Whether a login is pending or still inside its grace window.
    pub async fn is_pending(&self) -> bool {
        self.pending.lock().await.is_some()
    }

    fn start(&self, credentials: Credentials) -> PendingLogin {
        let client = self.client.clone();
        let login_url = self.login_url.clone();
        let store = Arc::clone(&self.store);
        let settle_delay = self.settle_delay;
        let grace_period = self.grace_period;
        let slot = Arc::clone(&self.pending);

        let attempt = tokio::spawn(async move {
            tokio::time::sleep(settle_delay).await;
            send_login(&client, login_url, &credentials, store.as_ref()).await
        });

        // Supervises the attempt so the slot is released even if it panics.
        let task = tokio::spawn(async move {
            let status = attempt.await.unwrap_or_else(|e| {
                warn!(error = %e, "Login task failed");
                STATUS_UNREACHABLE
            });

            tokio::spawn(async move {
                tokio::time::sleep(grace_period).await;
                slot.lock().await.take();
                debug!("Login slot released");
            });

            status
        });

        async move {
            task.await.unwrap_or_else(|e| {
                warn!(error = %e, "Login task failed");
                STATUS_UNREACHABLE
            })
        }
        .boxed()
        .shared()
    }
}

async fn send_login(
    client: &Client,
    login_url: Url,
    credentials: &Credentials,
    store: &dyn CredentialStore,
) -> u16 {
    let response = match client.post(login_url).json(credentials).send().await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "Login request failed");
            return STATUS_UNREACHABLE;
        }
    };

    let status = response.status().as_u16();
    if status == 200 {
        if let Err(e) = store.save_credentials(credentials) {
            warn!(error = %e, "Failed to persist credentials after login");
        }
        info!(username = %credentials.username, org_id = %credentials.org_id, "Logged in");
    } else {
        warn!(status, username = %credentials.username, "Login rejected");
    }
    status
}
