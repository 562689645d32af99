//! Client library for the univer student portal backend.
//!
//! The entry point is [`ApiClient`]: authenticated GET/POST requests with
//! request deduplication and transparent re-login when the session expires.
//! Credentials are kept in a [`CredentialStore`].

pub mod api;
pub mod auth;
pub mod config;

pub use api::{ApiClient, ApiError, ErrorKind, FetchOutcome};
pub use auth::{
    CredentialKey, CredentialStore, Credentials, MemoryCredentialStore, SystemCredentialStore,
};
pub use config::{Config, Language};
