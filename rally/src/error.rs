use crate::network::NetworkResponse;

/// Terminal outcome of a request that did not produce a result.
#[derive(thiserror::Error, Debug, Clone)]
pub enum RequestError {
    #[error("request timed out")]
    Timeout,
    #[error("no connection: {0}")]
    NoConnection(String),
    #[error("authentication failure (status {})", .0.status)]
    AuthFailure(NetworkResponse),
    #[error("server error (status {})", .0.status)]
    Server(NetworkResponse),
    #[error("network error (status {status:?})")]
    Network { status: Option<u16> },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("retries exhausted: {0}")]
    RetryExhausted(Box<RequestError>),
    #[error("unexpected error: {0}")]
    Unexpected(String),
    #[error("bad url: {0}")]
    BadUrl(String),
    #[error("file error: {0}")]
    File(String),
}

impl RequestError {
    /// Response received from the server, if the error carries one.
    pub fn network_response(&self) -> Option<&NetworkResponse> {
        match self {
            RequestError::AuthFailure(response) | RequestError::Server(response) => {
                Some(response)
            }
            RequestError::RetryExhausted(last) => last.network_response(),
            _ => None,
        }
    }

    /// Status code of the response behind the error, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::Network { status } => *status,
            _ => self.network_response().map(|response| response.status),
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            RequestError::Timeout => true,
            RequestError::RetryExhausted(last) => last.is_timeout(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn response(status: u16) -> NetworkResponse {
        NetworkResponse::new(status, HashMap::new(), b"denied".to_vec())
    }

    #[test]
    fn test_network_response_through_retry_exhausted() {
        let error = RequestError::RetryExhausted(Box::new(RequestError::AuthFailure(
            response(401),
        )));
        assert_eq!(error.network_response().unwrap().data, b"denied");
        assert_eq!(error.status(), Some(401));
        assert!(!error.is_timeout());
    }

    #[test]
    fn test_status_and_display() {
        assert_eq!(RequestError::Network { status: Some(502) }.status(), Some(502));
        assert_eq!(RequestError::Timeout.status(), None);
        assert_eq!(
            RequestError::Server(response(500)).to_string(),
            "server error (status 500)"
        );
        let exhausted = RequestError::RetryExhausted(Box::new(RequestError::Timeout));
        assert!(exhausted.is_timeout());
    }
}
