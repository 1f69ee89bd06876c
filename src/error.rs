use thiserror::Error;

/// Failures surfaced by bindings, the fetch adapter, and the transport.
///
/// The type is `Clone` so a single in-flight fetch can hand the same outcome
/// to every caller that joined it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// A binding or transport was constructed with insufficient parameters.
    #[error("configuration error: {message}")]
    Configuration { message: String },
    /// The underlying request failed or returned a non-success status.
    #[error("transport error: {message}")]
    Transport {
        status: Option<u16>,
        message: String,
        body: Option<String>,
    },
    /// A payload could not be encoded for, or decoded from, the transport.
    #[error("invalid payload: {message}")]
    Payload { message: String },
    /// The read was aborted through its cancellation token.
    #[error("request was cancelled")]
    Cancelled,
}

impl QueryError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            status: None,
            message: message.into(),
            body: None,
        }
    }

    /// Non-success HTTP response, keeping both status and body for the caller.
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        Self::Transport {
            status: Some(status),
            message: format!("server responded with status {status}"),
            body: (!body.is_empty()).then_some(body),
        }
    }

    pub fn payload(error: impl std::fmt::Display) -> Self {
        Self::Payload {
            message: error.to_string(),
        }
    }

    /// True when the failure is an abandoned read rather than a genuine error.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// HTTP status of a transport failure, when the server produced one.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for QueryError {
    fn from(error: reqwest::Error) -> Self {
        let message = if error.is_timeout() {
            format!("request timed out: {error}")
        } else {
            error.to_string()
        };
        Self::Transport {
            status: error.status().map(|status| status.as_u16()),
            message,
            body: None,
        }
    }
}

impl From<url::ParseError> for QueryError {
    fn from(error: url::ParseError) -> Self {
        Self::configuration(format!("invalid URL: {error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_keeps_body() {
        let err = QueryError::status(404, "missing");
        assert_eq!(err.http_status(), Some(404));
        assert!(matches!(
            err,
            QueryError::Transport {
                body: Some(ref body),
                ..
            } if body == "missing"
        ));
    }

    #[test]
    fn empty_body_is_dropped() {
        let err = QueryError::status(500, "");
        assert!(matches!(err, QueryError::Transport { body: None, .. }));
    }

    #[test]
    fn cancellation_is_distinguishable() {
        assert!(QueryError::Cancelled.is_cancelled());
        assert!(!QueryError::transport("boom").is_cancelled());
        assert_eq!(QueryError::Cancelled.http_status(), None);
    }
}
