//! Error types for Fleetreg

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using Fleetreg Error
pub type Result<T> = std::result::Result<T, Error>;

/// Fleetreg error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid client name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Duplicate name: client {0} is already provisioned")]
    DuplicateName(String),

    #[error("Address pool exhausted: no free address left in {network}")]
    AddressPoolExhausted { network: String },

    #[error("PKI tool failed during {operation} for {name}: {detail}")]
    PkiTool {
        operation: String,
        name: String,
        detail: String,
    },

    #[error("No certificate issued for {0}")]
    NotIssued(String),

    #[error("Management interface unavailable: {0}")]
    ManagementUnavailable(String),

    #[error("Resource not found: {kind} {id}")]
    NotFound { kind: String, id: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Registry service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Failure reported by the registry service
    #[error("{}", .0.message)]
    Remote(ErrorReport),
}

/// Machine-readable error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Storage,
    InvalidConfig,
    InvalidName,
    DuplicateName,
    AddressPoolExhausted,
    PkiToolError,
    NotIssued,
    ManagementUnavailable,
    NotFound,
    InvalidRequest,
    ServiceUnavailable,
}

impl ErrorKind {
    /// Suggested HTTP status for the API layer
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::InvalidName | ErrorKind::InvalidConfig | ErrorKind::InvalidRequest => 400,
            ErrorKind::NotIssued => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::DuplicateName => 409,
            ErrorKind::ManagementUnavailable | ErrorKind::ServiceUnavailable => 503,
            ErrorKind::Storage | ErrorKind::AddressPoolExhausted | ErrorKind::PkiToolError => 500,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Storage => "storage",
            ErrorKind::InvalidConfig => "invalid_config",
            ErrorKind::InvalidName => "invalid_name",
            ErrorKind::DuplicateName => "duplicate_name",
            ErrorKind::AddressPoolExhausted => "address_pool_exhausted",
            ErrorKind::PkiToolError => "pki_tool_error",
            ErrorKind::NotIssued => "not_issued",
            ErrorKind::ManagementUnavailable => "management_unavailable",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::ServiceUnavailable => "service_unavailable",
        };
        f.write_str(s)
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) | Error::Serialization(_) => ErrorKind::Storage,
            Error::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Error::InvalidName { .. } => ErrorKind::InvalidName,
            Error::DuplicateName(_) => ErrorKind::DuplicateName,
            Error::AddressPoolExhausted { .. } => ErrorKind::AddressPoolExhausted,
            Error::PkiTool { .. } => ErrorKind::PkiToolError,
            Error::NotIssued(_) => ErrorKind::NotIssued,
            Error::ManagementUnavailable(_) => ErrorKind::ManagementUnavailable,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Error::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
            Error::Remote(report) => report.kind,
        }
    }

    pub(crate) fn client_not_found(name: &str) -> Self {
        Error::NotFound {
            kind: "client".to_string(),
            id: name.to_string(),
        }
    }
}

/// Structured error payload: a kind plus a human-readable message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for ErrorReport {
    fn from(e: &Error) -> Self {
        match e {
            Error::Remote(report) => report.clone(),
            _ => Self {
                kind: e.kind(),
                message: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let e = Error::DuplicateName("alice".to_string());
        assert_eq!(e.kind(), ErrorKind::DuplicateName);
        assert_eq!(e.kind().http_status(), 409);

        let e = Error::client_not_found("bob");
        assert_eq!(e.kind().http_status(), 404);
        assert_eq!(e.to_string(), "Resource not found: client bob");
    }

    #[test]
    fn test_report_serialization() {
        let e = Error::ManagementUnavailable("connection refused".to_string());
        let report = ErrorReport::from(&e);
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"kind\":\"management_unavailable\""));
        assert!(json.contains("connection refused"));
    }

    #[test]
    fn test_remote_report_passes_through() {
        let report = ErrorReport {
            kind: ErrorKind::DuplicateName,
            message: "Duplicate name: client erin is already provisioned".to_string(),
        };
        let e = Error::Remote(report.clone());
        assert_eq!(e.kind(), ErrorKind::DuplicateName);
        assert_eq!(e.to_string(), report.message);
        assert_eq!(ErrorReport::from(&e), report);
    }
}
