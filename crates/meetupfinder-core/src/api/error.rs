use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized - API key may be invalid")]
    Unauthorized,

    #[error("Event search endpoint not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Error body returned by the directory API, e.g.
/// `{"errors":[{"code":"auth_fail","message":"Invalid signature"}]}`.
#[derive(Deserialize)]
struct ErrorBody {
    errors: Vec<ErrorEntry>,
}

#[derive(Deserialize)]
struct ErrorEntry {
    code: Option<String>,
    message: Option<String>,
}

impl ErrorEntry {
    fn describe(&self) -> Option<String> {
        match (self.code.as_deref(), self.message.as_deref()) {
            (Some(code), Some(message)) => Some(format!("{} ({})", message, code)),
            (None, Some(message)) => Some(message.to_string()),
            (Some(code), None) => Some(code.to_string()),
            (None, None) => None,
        }
    }
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let cut = (0..=MAX_ERROR_BODY_LENGTH)
                .rev()
                .find(|&i| body.is_char_boundary(i))
                .unwrap_or(0);
            format!("{}... (truncated, {} total bytes)", &body[..cut], body.len())
        }
    }

    /// The API's own error messages when the body carries them, else the raw
    /// body (truncated).
    fn describe_body(body: &str) -> String {
        let messages: Vec<String> = serde_json::from_str::<ErrorBody>(body)
            .map(|parsed| parsed.errors.iter().filter_map(ErrorEntry::describe).collect())
            .unwrap_or_default();

        if messages.is_empty() {
            Self::truncate_body(body)
        } else {
            Self::truncate_body(&messages.join("; "))
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let detail = Self::describe_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(detail),
            404 => ApiError::NotFound(detail),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(detail),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, detail)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_from_status() {
        assert!(matches!(ApiError::from_status(StatusCode::UNAUTHORIZED, ""), ApiError::Unauthorized));
        assert!(matches!(ApiError::from_status(StatusCode::TOO_MANY_REQUESTS, ""), ApiError::RateLimited));
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_GATEWAY, "upstream"),
            ApiError::ServerError(body) if body == "upstream"
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_REQUEST, "bad lat"),
            ApiError::InvalidResponse(msg) if msg.contains("bad lat")
        ));
    }

    #[test]
    fn test_forbidden_uses_api_error_messages() {
        let body = r#"{"errors":[{"code":"throttled","message":"Key suspended"},{"message":"Contact support"}]}"#;
        let err = ApiError::from_status(StatusCode::FORBIDDEN, body);
        assert!(matches!(
            &err,
            ApiError::AccessDenied(msg) if msg == "Key suspended (throttled); Contact support"
        ));
        assert_eq!(
            err.to_string(),
            "Access denied: Key suspended (throttled); Contact support"
        );
    }

    #[test]
    fn test_not_found_falls_back_to_raw_body() {
        assert!(matches!(
            ApiError::from_status(StatusCode::NOT_FOUND, "<html>no such method</html>"),
            ApiError::NotFound(body) if body == "<html>no such method</html>"
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::NOT_FOUND, r#"{"errors":[]}"#),
            ApiError::NotFound(body) if body == r#"{"errors":[]}"#
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::NOT_FOUND, r#"{"errors":[{"code":"not_found"}]}"#),
            ApiError::NotFound(body) if body == "not_found"
        ));
    }

    #[test]
    fn test_truncate_body() {
        let long = "é".repeat(400);
        let truncated = ApiError::truncate_body(&long);
        assert!(truncated.contains("truncated, 800 total bytes"));
        assert_eq!(ApiError::truncate_body("short"), "short");
    }
}
