//! Error type shared by every reconciliation subroutine.
//!
//! Each lower layer (FGA backend, schema compiler, resource store, config) has
//! its own error enum and converts into [`OperatorError`], which carries the
//! `(cause, retryable, fatal)` triple the runtime uses to decide whether and
//! when to retry.

use std::fmt;

/// Broad category of a reconcile failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The authorization backend failed or rejected a call.
    Backend,
    /// Schema fragments failed to compile or merge.
    Schema,
    /// An object this reconcile depends on does not exist yet.
    PrerequisiteMissing,
    /// The resource store failed a read or write.
    Client,
    /// Optimistic-concurrency conflict on a resource write.
    Conflict,
    /// A business rule refuses the operation while dependents exist.
    BlockedByDependents,
    /// Misconfiguration or malformed references.
    Configuration,
}

impl ErrorKind {
    /// Stable reason string used on status conditions.
    pub fn reason(&self) -> &'static str {
        match self {
            ErrorKind::Backend => "BackendError",
            ErrorKind::Schema => "SchemaError",
            ErrorKind::PrerequisiteMissing => "PrerequisiteMissing",
            ErrorKind::Client => "ClientError",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::BlockedByDependents => "BlockedByDependents",
            ErrorKind::Configuration => "ConfigurationError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// A reconcile failure with retry semantics attached.
pub struct OperatorError {
    kind: ErrorKind,
    message: String,
    retryable: bool,
    fatal: bool,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl OperatorError {
    /// A transient failure; the runtime retries with backoff.
    pub fn retryable(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: true,
            fatal: false,
            source: None,
        }
    }

    /// A business-rule refusal. Not retried until the object changes.
    pub fn blocked(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::BlockedByDependents,
            message: message.into(),
            retryable: false,
            fatal: false,
            source: None,
        }
    }

    /// A configuration problem. Surfaced as-is, never retry-masked.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Configuration,
            message: message.into(),
            retryable: false,
            fatal: true,
            source: None,
        }
    }

    /// Attach the underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal
    }
}

impl fmt::Display for OperatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl fmt::Debug for OperatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorError")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("retryable", &self.retryable)
            .field("fatal", &self.fatal)
            .finish()
    }
}

impl std::error::Error for OperatorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

pub type OperatorResult<T> = Result<T, OperatorError>;
