//! Schema compilation errors.

use fgasync_core::error::{ErrorKind, OperatorError};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// DSL text of a module could not be parsed.
    Parse { module: String, message: String },
    /// A construct the compiler does not support, such as conditions.
    Unsupported { module: String, feature: String },
    UnsupportedVersion(String),
    /// Two modules (or one module twice) define the same type.
    DuplicateType { type_name: String, module: String },
    DuplicateRelation {
        type_name: String,
        relation: String,
        module: String,
    },
    /// `extend type` of a type no module defines.
    UnknownExtendedType { type_name: String, module: String },
    /// A relation references a type that does not exist.
    UnknownType {
        type_name: String,
        relation: String,
        referenced: String,
    },
    /// A relation references a relation that does not exist.
    UnknownRelation {
        type_name: String,
        relation: String,
        referenced: String,
    },
    /// A relation uses more than one direct-assignment list.
    InvalidRelation {
        type_name: String,
        relation: String,
        message: String,
    },
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::Parse { module, message } => {
                write!(f, "module '{module}': parse error: {message}")
            }
            SchemaError::Unsupported { module, feature } => {
                write!(f, "module '{module}': {feature} are not supported")
            }
            SchemaError::UnsupportedVersion(version) => {
                write!(f, "unsupported schema version '{version}'")
            }
            SchemaError::DuplicateType { type_name, module } => {
                write!(f, "module '{module}': type '{type_name}' is already defined")
            }
            SchemaError::DuplicateRelation {
                type_name,
                relation,
                module,
            } => write!(
                f,
                "module '{module}': relation '{relation}' is already defined on type '{type_name}'"
            ),
            SchemaError::UnknownExtendedType { type_name, module } => {
                write!(f, "module '{module}': cannot extend undefined type '{type_name}'")
            }
            SchemaError::UnknownType {
                type_name,
                relation,
                referenced,
            } => write!(
                f,
                "{type_name}#{relation}: referenced type '{referenced}' is not defined"
            ),
            SchemaError::UnknownRelation {
                type_name,
                relation,
                referenced,
            } => write!(
                f,
                "{type_name}#{relation}: referenced relation '{referenced}' is not defined"
            ),
            SchemaError::InvalidRelation {
                type_name,
                relation,
                message,
            } => write!(f, "{type_name}#{relation}: {message}"),
        }
    }
}

impl std::error::Error for SchemaError {}

impl From<SchemaError> for OperatorError {
    fn from(err: SchemaError) -> Self {
        OperatorError::retryable(ErrorKind::Schema, err.to_string()).with_source(err)
    }
}
