//! Error types for FGA backend calls.

use fgasync_core::error::{ErrorKind, OperatorError};
use openfga_rs::tonic;
use openfga_rs::{ErrorCode, NotFoundErrorCode};
use std::fmt;

/// Errors returned by an [`FgaBackend`](crate::backend::FgaBackend).
///
/// `NotFound` and `Duplicate` come from the standard gRPC codes or from one
/// of the [`OpenFgaFailure`]s. Callers treat them as success where the
/// operation is idempotent (store delete, tuple write, tuple delete).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FgaError {
    /// Failed to connect to the server, or the server is unavailable.
    ConnectionFailed(String),
    /// The server rejected or failed the call.
    ServerError(String),
    /// The store, model or tuple does not exist.
    NotFound(String),
    /// The tuple (or store) already exists.
    Duplicate(String),
    Timeout,
    InvalidConfig(String),
    /// A remote model could not be mapped onto the local schema types.
    Conversion(String),
}

impl FgaError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FgaError::NotFound(_))
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, FgaError::Duplicate(_))
    }

    /// Duplicate on write or missing on delete.
    pub fn is_idempotent(&self) -> bool {
        self.is_not_found() || self.is_duplicate()
    }
}

impl fmt::Display for FgaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FgaError::ConnectionFailed(msg) => write!(f, "OpenFGA connection failed: {msg}"),
            FgaError::ServerError(msg) => write!(f, "OpenFGA server error: {msg}"),
            FgaError::NotFound(msg) => write!(f, "OpenFGA not found: {msg}"),
            FgaError::Duplicate(msg) => write!(f, "OpenFGA already exists: {msg}"),
            FgaError::Timeout => write!(f, "OpenFGA request timed out"),
            FgaError::InvalidConfig(msg) => write!(f, "Invalid OpenFGA config: {msg}"),
            FgaError::Conversion(msg) => write!(f, "OpenFGA model conversion failed: {msg}"),
        }
    }
}

impl std::error::Error for FgaError {}

impl From<tonic::transport::Error> for FgaError {
    fn from(err: tonic::transport::Error) -> Self {
        FgaError::ConnectionFailed(err.to_string())
    }
}

/// Failures OpenFGA reports with its own error codes rather than a standard
/// gRPC code.
///
/// OpenFGA puts values such as `2017` or `5002` in `grpc-status`. tonic
/// decodes anything outside the standard range as [`tonic::Code::Unknown`]
/// and drops the number, so these are recognised by the message OpenFGA
/// attaches to each code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFgaFailure {
    /// `write_failed_due_to_invalid_input` on a write of an existing tuple.
    TupleExists,
    /// `write_failed_due_to_invalid_input` on a delete of a missing tuple.
    TupleMissing,
    /// `store_id_not_found`.
    StoreNotFound,
    /// `authorization_model_not_found` or `latest_authorization_model_not_found`.
    ModelNotFound,
}

impl OpenFgaFailure {
    /// Numeric code OpenFGA sends in `grpc-status`.
    pub fn code(self) -> i32 {
        match self {
            OpenFgaFailure::TupleExists | OpenFgaFailure::TupleMissing => {
                ErrorCode::WriteFailedDueToInvalidInput as i32
            }
            OpenFgaFailure::StoreNotFound => NotFoundErrorCode::StoreIdNotFound as i32,
            OpenFgaFailure::ModelNotFound => ErrorCode::AuthorizationModelNotFound as i32,
        }
    }

    /// The status an OpenFGA server answers with. `detail` is the tuple or
    /// model id the message names; store-not-found carries none.
    pub fn status(self, detail: &str) -> tonic::Status {
        let message = match self {
            OpenFgaFailure::TupleExists => {
                format!("cannot write a tuple which already exists: {detail}")
            }
            OpenFgaFailure::TupleMissing => {
                format!("cannot delete a tuple which does not exist: {detail}")
            }
            OpenFgaFailure::StoreNotFound => "store ID not found".to_string(),
            OpenFgaFailure::ModelNotFound => format!("Authorization Model '{detail}' not found"),
        };
        tonic::Status::new(tonic::Code::from(self.code()), message)
    }

    /// Recognise a failure from a status message, or from the code name the
    /// HTTP gateway puts in front of it.
    pub fn from_message(message: &str) -> Option<Self> {
        let message = message.to_ascii_lowercase();
        if message.contains("cannot write a tuple which already exists") {
            Some(OpenFgaFailure::TupleExists)
        } else if message.contains("cannot delete a tuple which does not exist") {
            Some(OpenFgaFailure::TupleMissing)
        } else if message.contains("store id not found")
            || message.contains(NotFoundErrorCode::StoreIdNotFound.as_str_name())
        {
            Some(OpenFgaFailure::StoreNotFound)
        } else if (message.starts_with("authorization model") && message.ends_with("not found"))
            || message.starts_with("no authorization models found")
            || message.contains(ErrorCode::AuthorizationModelNotFound.as_str_name())
            || message.contains(ErrorCode::LatestAuthorizationModelNotFound.as_str_name())
        {
            Some(OpenFgaFailure::ModelNotFound)
        } else {
            None
        }
    }
}

impl From<tonic::Status> for FgaError {
    fn from(status: tonic::Status) -> Self {
        let message = status.message().to_string();
        match status.code() {
            tonic::Code::NotFound => FgaError::NotFound(message),
            tonic::Code::AlreadyExists => FgaError::Duplicate(message),
            tonic::Code::DeadlineExceeded => FgaError::Timeout,
            tonic::Code::Unavailable => FgaError::ConnectionFailed(message),
            tonic::Code::Unknown => match OpenFgaFailure::from_message(&message) {
                Some(OpenFgaFailure::TupleExists) => FgaError::Duplicate(message),
                Some(_) => FgaError::NotFound(message),
                None => FgaError::ServerError(format!("Unknown: {message}")),
            },
            code => FgaError::ServerError(format!("{code:?}: {message}")),
        }
    }
}

impl From<FgaError> for OperatorError {
    fn from(err: FgaError) -> Self {
        match &err {
            FgaError::InvalidConfig(_) => OperatorError::fatal(err.to_string()),
            _ => OperatorError::retryable(ErrorKind::Backend, err.to_string()),
        }
        .with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_classify() {
        let err: FgaError = tonic::Status::not_found("store gone").into();
        assert!(err.is_not_found());
        let err: FgaError = tonic::Status::already_exists("tuple exists").into();
        assert!(err.is_duplicate());
        let err: FgaError = tonic::Status::deadline_exceeded("slow").into();
        assert_eq!(err, FgaError::Timeout);
    }

    #[test]
    fn test_openfga_codes_classify() {
        let err: FgaError = tonic::Status::new(
            tonic::Code::from(2017),
            "cannot write a tuple which already exists: user: 'user:alice', relation: 'viewer', object: 'doc:a'",
        )
        .into();
        assert!(err.is_duplicate());

        let err: FgaError =
            tonic::Status::new(tonic::Code::from(2017), "cannot delete a tuple which does not exist: doc:a").into();
        assert!(err.is_not_found());

        let err: FgaError = tonic::Status::new(tonic::Code::from(5002), "store ID not found").into();
        assert!(err.is_not_found());

        let err: FgaError =
            tonic::Status::new(tonic::Code::from(2001), "Authorization Model '01HX' not found").into();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_server_statuses_round_trip_through_classification() {
        let cases = [
            (OpenFgaFailure::TupleExists, "doc:a#viewer@user:alice"),
            (OpenFgaFailure::TupleMissing, "doc:a#viewer@user:alice"),
            (OpenFgaFailure::StoreNotFound, ""),
            (OpenFgaFailure::ModelNotFound, "01HX"),
        ];
        for (failure, detail) in cases {
            let status = failure.status(detail);
            assert_eq!(status.code(), tonic::Code::Unknown);
            assert_eq!(OpenFgaFailure::from_message(status.message()), Some(failure));
        }
        assert_eq!(OpenFgaFailure::TupleExists.code(), 2017);
        assert_eq!(OpenFgaFailure::StoreNotFound.code(), 5002);
        assert_eq!(OpenFgaFailure::ModelNotFound.code(), 2001);
    }

    #[test]
    fn test_other_unknown_statuses_stay_server_errors() {
        let err: FgaError = tonic::Status::new(tonic::Code::from(2000), "invalid relation").into();
        assert_eq!(err, FgaError::ServerError("Unknown: invalid relation".into()));
        assert!(!err.is_idempotent());
    }

    #[test]
    fn test_message_text_is_ignored_on_standard_codes() {
        let err: FgaError = tonic::Status::invalid_argument("tuple already exists").into();
        assert!(!err.is_idempotent());
    }

    #[test]
    fn test_operator_error_mapping() {
        let op: OperatorError = FgaError::ServerError("boom".into()).into();
        assert_eq!(op.kind(), ErrorKind::Backend);
        assert!(op.is_retryable());

        let op: OperatorError = FgaError::InvalidConfig("no endpoint".into()).into();
        assert!(op.is_fatal());
    }
}
