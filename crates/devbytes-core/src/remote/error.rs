use thiserror::Error;

/// Failure of a single playlist fetch.
///
/// `Network` and `Http` are transient: the same request may succeed later.
/// `InvalidResponse` is permanent: the server answered with a body this
/// client cannot understand.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl FetchError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        FetchError::Http {
            status: status.as_u16(),
            body: Self::truncate_body(body),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Network(_) | FetchError::Http { .. })
    }
}
