//! Typed shortcuts for the backend's data endpoints.
//!
//! The backend passes university data through mostly as scraped, so the
//! bodies are returned as JSON values and left to the caller to interpret.

use serde_json::Value;
use tracing::debug;

use super::error::{ApiError, STATUS_UNREACHABLE};
use super::ApiClient;

const SCHEDULE_PATH: &str = "/api/schedule";
const TRANSCRIPT_PATH: &str = "/api/transcript";
const ATTESTATION_PATH: &str = "/api/attestation";
const EXAMS_PATH: &str = "/api/exams";
const UMKD_PATH: &str = "/api/umkd";
const VERSION_PATH: &str = "/api/version";

impl ApiClient {
    /// Fetch the weekly lesson schedule
    pub async fn fetch_schedule(&self) -> Result<Value, ApiError> {
        self.auth_fetch(SCHEDULE_PATH).await
    }

    /// Fetch the academic transcript
    pub async fn fetch_transcript(&self) -> Result<Value, ApiError> {
        self.auth_fetch(TRANSCRIPT_PATH).await
    }

    /// Fetch attestation marks
    pub async fn fetch_attestation(&self) -> Result<Value, ApiError> {
        self.auth_fetch(ATTESTATION_PATH).await
    }

    /// Fetch the exam timetable
    pub async fn fetch_exams(&self) -> Result<Value, ApiError> {
        self.auth_fetch(EXAMS_PATH).await
    }

    /// Fetch the course material folders, one per subject
    pub async fn fetch_umkd_folders(&self) -> Result<Value, ApiError> {
        self.auth_fetch(UMKD_PATH).await
    }

    /// Fetch the course material files of one subject
    pub async fn fetch_umkd_files(&self, subject_id: &str) -> Result<Value, ApiError> {
        self.auth_fetch(&format!("{}/{}", UMKD_PATH, subject_id)).await
    }

    /// Backend version string. Does not require a session.
    pub async fn fetch_version(&self) -> Result<String, ApiError> {
        let url = self
            .config()
            .endpoint(VERSION_PATH)
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;

        let response = self.http().get(url).send().await.map_err(|e| {
            debug!(error = %e, "Version request failed");
            ApiError::Http(STATUS_UNREACHABLE)
        })?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(ApiError::Http(status));
        }
        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}
