//! Modular FGA DSL compiler.
//!
//! A store's schema is assembled from one core module plus any number of
//! extension modules. [`compile_modules`] parses and merges them,
//! [`to_canonical_text`] renders a model in a stable form for change
//! detection.
//!
//! ```
//! use fgasync_schema::{compile_modules, to_canonical_text, ModuleFile, SchemaVersion};
//!
//! let modules = [
//!     ModuleFile::new("store", "module core\ntype user"),
//!     ModuleFile::new("root:orgs/docs", "module docs\ntype doc\n  relations\n    define viewer: [user]"),
//! ];
//! let model = compile_modules(&modules, SchemaVersion::V1_1).unwrap();
//! assert!(to_canonical_text(&model).contains("define viewer: [user]"));
//! ```

pub mod canonical;
pub mod compose;
pub mod error;
pub mod parser;
pub mod types;

pub use canonical::{equivalent, to_canonical_text};
pub use compose::compile_modules;
pub use error::SchemaError;
pub use parser::{parse_module, ParsedModule, ParsedType};
pub use types::{
    AuthorizationModel, ModuleFile, RelationDefinition, SchemaVersion, TypeDefinition,
    TypeRestriction, Userset,
};
