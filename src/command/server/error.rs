use std::fmt;

use hyper::StatusCode;
use serde_json::json;

use crate::auth::Rejection;
use crate::metrics_provider;

#[derive(Debug, PartialEq)]
pub enum Error {
    Initialization(String),
    Execution(String),
    // mappable to classical HTTP responses
    Unauthorized {
        reason: String,
        challenge: Option<String>,
    },
    NotFound(String),
    MethodNotAllowed(String),
    Internal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Initialization(err) | Error::Execution(err) => write!(f, "{err}"),
            Error::Unauthorized { reason, .. } => write!(f, "Unauthorized: {reason}"),
            Error::NotFound(err) => write!(f, "Not Found: {err}"),
            Error::MethodNotAllowed(err) => write!(f, "Method Not Allowed: {err}"),
            Error::Internal(err) => write!(f, "Internal Server Error: {err}"),
        }
    }
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Error::Initialization(_) | Error::Execution(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Error::Unauthorized { .. } => "UNAUTHORIZED",
            Error::NotFound(_) => "NOT_FOUND",
            Error::MethodNotAllowed(_) => "METHOD_NOT_ALLOWED",
            Error::Initialization(_) | Error::Execution(_) | Error::Internal(_) => "INTERNAL",
        }
    }

    pub fn as_json(&self, request_id: Option<&String>) -> serde_json::Value {
        // Internal details stay in the logs.
        let message = match self {
            Error::Unauthorized { reason, .. } => reason.clone(),
            Error::NotFound(msg) | Error::MethodNotAllowed(msg) => msg.clone(),
            Error::Initialization(_) | Error::Execution(_) | Error::Internal(_) => {
                "internal server error".to_string()
            }
        };

        match request_id {
            Some(request_id) => json!({
                "code": self.code(),
                "message": message,
                "request_id": request_id,
            }),
            None => json!({
                "code": self.code(),
                "message": message,
            }),
        }
    }
}

impl From<Rejection> for Error {
    fn from(rejection: Rejection) -> Self {
        Error::Unauthorized {
            reason: rejection.reason,
            challenge: rejection.challenge,
        }
    }
}

impl From<metrics_provider::Error> for Error {
    fn from(error: metrics_provider::Error) -> Self {
        Error::Internal(error.to_string())
    }
}

impl From<hyper::http::Error> for Error {
    fn from(error: hyper::http::Error) -> Self {
        Error::Internal(format!("Failed to build response: {error}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Internal(format!("Failed to serialize response: {error}"))
    }
}
