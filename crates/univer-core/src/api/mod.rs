//! REST API client module for the student portal backend.
//!
//! This module provides the `ApiClient` for authenticated requests. The
//! backend keeps its session in cookies and signals why a request was
//! rejected through the `error` field of 401 bodies; the client recovers
//! from expired sessions by logging in again with stored credentials.

pub mod client;
pub mod dedup;
pub mod endpoints;
pub mod error;

pub use client::ApiClient;
pub use dedup::{FetchOutcome, RequestDeduplicator};
pub use error::{ApiError, ErrorKind};
