use thiserror::Error;

/// Status reported when the backend could not be reached at all.
pub const STATUS_UNREACHABLE: u16 = 404;

/// Status reported when the authenticated retry budget runs out.
pub const STATUS_TIMEOUT: u16 = 408;

#[derive(Error, Debug)]
pub enum ApiError {
    /// Session is permanently invalid or access is forbidden. The caller
    /// must send the user back through login.
    #[error("Unauthorized - please log in again")]
    Unauthorized,

    #[error("HTTP error: status {0}")]
    Http(u16),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http(status) => Some(*status),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ApiError::Http(STATUS_TIMEOUT))
    }
}

/// Why the backend rejected a request with 401, read from the `error`
/// field of the response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The backend re-logged in on our behalf; repeat the request.
    SessionRefreshed,
    /// The stored password no longer works anywhere.
    CredentialsChanged,
    SessionExpired,
    Unauthorized,
    InvalidCreds,
    Other(String),
}

impl ErrorKind {
    pub fn parse(value: &str) -> Self {
        match value {
            "session_refreshed" => ErrorKind::SessionRefreshed,
            "credentials_changed" => ErrorKind::CredentialsChanged,
            "session_expired" => ErrorKind::SessionExpired,
            "unauthorized" => ErrorKind::Unauthorized,
            "invalid_creds" => ErrorKind::InvalidCreds,
            other => ErrorKind::Other(other.to_string()),
        }
    }

    /// Extract the kind from a 401 body. Anything that is not a JSON object
    /// with a non-empty string `error` field yields `None`.
    pub fn from_body(body: &[u8]) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_slice(body).ok()?;
        let error = value.get("error")?.as_str()?;
        if error.is_empty() {
            return None;
        }
        Some(Self::parse(error))
    }
}
