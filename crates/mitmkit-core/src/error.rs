//! Error taxonomy shared by every layer of mitmkit, realizing the
//! proxy/scan error kinds as a single enum with an HTTP status mapping.

use thiserror::Error;

/// Errors surfaced by the canonicalizer, replay engine, scanner, proxy
/// transport, and storage layer.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to parse form data: {0}")]
    ParseFormData(String),

    #[error("failed to parse proxied request: {0}")]
    ParseRequest(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("failed to marshal json: {0}")]
    JsonMarshal(#[from] serde_json::Error),

    #[error("failed to serve CONNECT tunnel: {0}")]
    ServingConnect(String),

    #[error("failed to send upstream request: {0}")]
    SendingRequest(String),

    #[error("failed to parse upstream response: {0}")]
    ParsingResponse(String),

    #[error("failed to serve response to client: {0}")]
    ServingResponse(String),

    #[error("failed to save response: {0}")]
    SavingResponse(String),

    #[error("request not found: {0}")]
    NotFound(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl ProxyError {
    /// HTTP status to use when this error crosses the API boundary, per
    /// the error taxonomy table.
    pub fn status_code(&self) -> u16 {
        match self {
            ProxyError::InvalidRequest(_) => 400,
            ProxyError::ParseFormData(_) => 400,
            ProxyError::ParseRequest(_) => 400,
            ProxyError::NotFound(_) => 404,
            ProxyError::Cancelled => 499,
            ProxyError::Internal(_)
            | ProxyError::JsonMarshal(_)
            | ProxyError::ServingConnect(_)
            | ProxyError::SendingRequest(_)
            | ProxyError::ParsingResponse(_)
            | ProxyError::ServingResponse(_)
            | ProxyError::SavingResponse(_) => 500,
        }
    }
}

/// Result type used throughout mitmkit's core operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(ProxyError::InvalidRequest("x".into()).status_code(), 400);
        assert_eq!(ProxyError::NotFound("x".into()).status_code(), 404);
        assert_eq!(ProxyError::Cancelled.status_code(), 499);
        assert_eq!(ProxyError::Internal("x".into()).status_code(), 500);
        assert_eq!(ProxyError::SendingRequest("x".into()).status_code(), 500);
    }
}
