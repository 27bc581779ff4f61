use http::StatusCode;
use thiserror::Error;

/// Error types that can occur while relaying a chat turn.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The inbound request is missing a required field or is malformed.
    #[error("Invalid Request: {0}")]
    InvalidRequest(String),

    /// The upstream model API rejected or failed the call.
    #[error("Upstream Error: {0}")]
    Upstream(String),

    /// Transport level failure talking to an external service.
    #[error("HTTP Error: {0}")]
    HttpError(String),

    /// The upstream answered with a body we could not decode.
    #[error("Response Format Error: {message}. Raw response: '{raw_response}'")]
    ResponseFormatError {
        message: String,
        raw_response: String,
    },

    /// The identity provider could not be consulted.
    #[error("Identity Error: {0}")]
    Identity(String),

    /// Missing or inconsistent process configuration.
    #[error("Configuration Error: {0}")]
    Config(String),

    /// Handles JSON serialization and deserialization errors.
    #[error("JSON Error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Handles errors from parsing URLs.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl RelayError {
    /// HTTP status the boundary layer should answer with for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The raw message carried by the error, without the variant prefix.
    pub fn message(&self) -> String {
        match self {
            RelayError::InvalidRequest(msg)
            | RelayError::Upstream(msg)
            | RelayError::HttpError(msg)
            | RelayError::Identity(msg)
            | RelayError::Config(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        RelayError::HttpError(err.to_string())
    }
}

impl From<http::Error> for RelayError {
    fn from(err: http::Error) -> Self {
        RelayError::HttpError(err.to_string())
    }
}

pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_request_maps_to_bad_request() {
        let err = RelayError::InvalidRequest("text is required".into());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.message(), "text is required");
    }

    #[test]
    fn upstream_failures_map_to_internal_error() {
        let err = RelayError::Upstream("boom".into());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "Upstream Error: boom");
    }
}
