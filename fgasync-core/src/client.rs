//! Generic CRUD contract over typed resources.
//!
//! Uses RPITIT (return-position `impl Trait` in traits), so reconcilers are
//! generic over the client rather than boxing it.

use crate::error::{ErrorKind, OperatorError};
use crate::meta::{ObjectKey, Resource};
use std::fmt;
use std::future::Future;

/// Errors raised by a [`ResourceClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    NotFound { kind: &'static str, key: ObjectKey },
    AlreadyExists { kind: &'static str, key: ObjectKey },
    /// The caller's `resourceVersion` is stale.
    Conflict {
        kind: &'static str,
        key: ObjectKey,
        expected: u64,
        actual: u64,
    },
    /// The kind is not part of the client's scheme.
    UnknownKind(&'static str),
    Serialization(String),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound { .. })
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::NotFound { kind, key } => write!(f, "{kind} {key} not found"),
            ClientError::AlreadyExists { kind, key } => write!(f, "{kind} {key} already exists"),
            ClientError::Conflict {
                kind,
                key,
                expected,
                actual,
            } => write!(
                f,
                "{kind} {key} was modified (resourceVersion {expected} is stale, current {actual})"
            ),
            ClientError::UnknownKind(kind) => write!(f, "kind {kind} is not registered in the scheme"),
            ClientError::Serialization(msg) => write!(f, "serialization error: {msg}"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<ClientError> for OperatorError {
    fn from(err: ClientError) -> Self {
        match &err {
            ClientError::NotFound { .. } => {
                OperatorError::retryable(ErrorKind::PrerequisiteMissing, err.to_string())
            }
            ClientError::AlreadyExists { .. } | ClientError::Conflict { .. } => {
                OperatorError::retryable(ErrorKind::Conflict, err.to_string())
            }
            ClientError::UnknownKind(_) | ClientError::Serialization(_) => {
                OperatorError::fatal(err.to_string())
            }
        }
        .with_source(err)
    }
}

/// Which workspaces a list call covers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ListScope {
    /// Every workspace the client can see.
    #[default]
    All,
    /// Exactly one workspace.
    Workspace(String),
    /// A workspace and all of its descendants.
    Subtree(String),
}

impl ListScope {
    pub fn contains(&self, path: &str) -> bool {
        match self {
            ListScope::All => true,
            ListScope::Workspace(ws) => ws == path,
            ListScope::Subtree(root) => {
                path == root
                    || path
                        .strip_prefix(root.as_str())
                        .is_some_and(|rest| rest.starts_with(':'))
            }
        }
    }
}

/// Typed get/list/create/update/delete over registered resource kinds.
///
/// Deleting an object that still carries finalizers only marks it for
/// deletion; it disappears once an update leaves its finalizer list empty.
pub trait ResourceClient: Clone + Send + Sync + 'static {
    fn get<R: Resource>(&self, key: &ObjectKey) -> impl Future<Output = Result<R, ClientError>> + Send;

    fn list<R: Resource>(&self, scope: &ListScope) -> impl Future<Output = Result<Vec<R>, ClientError>> + Send;

    fn create<R: Resource>(&self, object: &R) -> impl Future<Output = Result<R, ClientError>> + Send;

    /// Optimistic on `meta.resource_version`.
    fn update<R: Resource>(&self, object: &R) -> impl Future<Output = Result<R, ClientError>> + Send;

    fn delete<R: Resource>(&self, key: &ObjectKey) -> impl Future<Output = Result<(), ClientError>> + Send;
}

/// Map a not-found result to `None`.
pub fn optional<T>(result: Result<T, ClientError>) -> Result<Option<T>, ClientError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}
