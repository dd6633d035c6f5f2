// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use hyper::StatusCode;
use metrics_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The request could not be understood: malformed body, path or signature.
    #[error("{0}")]
    BadRequest(String),

    #[error("Incorrect metric type")]
    IncorrectType,

    #[error("Incorrect value")]
    IncorrectValue,

    #[error("Not found")]
    NotFound,

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Payload too large")]
    PayloadTooLarge,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) | ServerError::IncorrectType | ServerError::IncorrectValue => {
                StatusCode::BAD_REQUEST
            }
            ServerError::NotFound => StatusCode::NOT_FOUND,
            ServerError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ServerError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ServerError::Store(StoreError::InvalidMetric(_)) => StatusCode::BAD_REQUEST,
            ServerError::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ServerError::Store(_) | ServerError::Io(_) | ServerError::InvalidConfig(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(e: serde_json::Error) -> Self {
        ServerError::BadRequest(format!("Invalid JSON: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_store::MetricKind;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ServerError::IncorrectType.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ServerError::IncorrectValue.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ServerError::Store(StoreError::InvalidMetric("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServerError::Store(StoreError::not_found(MetricKind::Gauge, "x")).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServerError::Store(StoreError::Persistence(std::io::Error::other("disk"))).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(ServerError::from(json_error).status(), StatusCode::BAD_REQUEST);
    }
}
