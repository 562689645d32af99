//! Collapsing of concurrent identical requests.
//!
//! The first caller for a key starts the request on its own tokio task; every
//! caller that arrives while it is in flight awaits the same shared result.
//! The entry is dropped from the map as soon as the request settles, so the
//! next call after that goes back to the network.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Response;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::error::{ErrorKind, STATUS_UNREACHABLE};

/// Settled result of one request, shared by every caller that joined it.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome<T> {
    /// Parsed body, present only for HTTP 200.
    pub data: Option<T>,
    pub status: u16,
    /// Only ever set for HTTP 401.
    pub error_kind: Option<ErrorKind>,
}

impl<T> FetchOutcome<T> {
    fn status_only(status: u16) -> Self {
        Self {
            data: None,
            status,
            error_kind: None,
        }
    }

    fn unreachable() -> Self {
        Self::status_only(STATUS_UNREACHABLE)
    }
}

type PendingFetch<T> = Shared<BoxFuture<'static, FetchOutcome<T>>>;

pub struct RequestDeduplicator<T> {
    pending: Arc<Mutex<HashMap<String, PendingFetch<T>>>>,
}

impl<T> Clone for RequestDeduplicator<T> {
    fn clone(&self) -> Self {
        Self {
            pending: Arc::clone(&self.pending),
        }
    }
}

impl<T> Default for RequestDeduplicator<T> {
    fn default() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T> RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue `perform` for `key` unless a request for it is already in
    /// flight, in which case join that one. `parse` turns a 200 response
    /// into data; `perform` and `parse` of a joining caller are not used.
    pub async fn fetch_once<F, Fut, P, PFut>(
        &self,
        key: &str,
        perform: F,
        parse: P,
    ) -> FetchOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = reqwest::Result<Response>> + Send + 'static,
        P: FnOnce(Response) -> PFut + Send + 'static,
        PFut: Future<Output = reqwest::Result<T>> + Send + 'static,
    {
        let pending = {
            let mut map = self.pending.lock().await;
            if let Some(existing) = map.get(key) {
                debug!(key, "Joining in-flight request");
                existing.clone()
            } else {
                let request = perform();
                let map_handle = Arc::clone(&self.pending);
                let owned_key = key.to_string();

                // The request runs on its own task so a panicking parser
                // cannot skip the removal below. The map lock is still held
                // here, so the entry is inserted before it can be removed.
                let work = tokio::spawn(settle(request, parse));
                let task = tokio::spawn(async move {
                    let outcome = work.await.unwrap_or_else(|e| {
                        warn!(error = %e, key = %owned_key, "Request task failed");
                        FetchOutcome::unreachable()
                    });
                    map_handle.lock().await.remove(&owned_key);
                    outcome
                });

                let shared = async move {
                    task.await.unwrap_or_else(|e| {
                        warn!(error = %e, "Request task failed");
                        FetchOutcome::unreachable()
                    })
                }
                .boxed()
                .shared();

                map.insert(key.to_string(), shared.clone());
                shared
            }
        };

        pending.await
    }

    /// Number of requests currently in flight.
    pub async fn in_flight(&self) -> usize {
        self.pending.lock().await.len()
    }
}

async fn settle<T, Fut, P, PFut>(request: Fut, parse: P) -> FetchOutcome<T>
where
    Fut: Future<Output = reqwest::Result<Response>>,
    P: FnOnce(Response) -> PFut,
    PFut: Future<Output = reqwest::Result<T>>,
{
    let response = match request.await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "Request failed, backend unreachable");
            return FetchOutcome::unreachable();
        }
    };

    let status = response.status().as_u16();
    match status {
        200 => match parse(response).await {
            Ok(data) => FetchOutcome {
                data: Some(data),
                status,
                error_kind: None,
            },
            Err(e) => {
                warn!(error = %e, "Failed to read response body");
                FetchOutcome::unreachable()
            }
        },
        401 => {
            let error_kind = match response.bytes().await {
                Ok(body) => ErrorKind::from_body(&body),
                Err(_) => None,
            };
            debug!(?error_kind, "Request unauthorized");
            FetchOutcome {
                data: None,
                status,
                error_kind,
            }
        }
        _ => FetchOutcome::status_only(status),
    }
}
