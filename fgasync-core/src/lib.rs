//! Core types shared by every fgasync crate.
//!
//! Resource kinds, the resource-store contract and its in-memory
//! implementation, sibling lookups, the reconcile subroutine contract,
//! status conditions, configuration loading and logging setup.

pub mod client;
pub mod conditions;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod lookup;
pub mod memory;
pub mod meta;
pub mod resources;
pub mod scheme;
pub mod watch;

pub use client::{optional, ClientError, ListScope, ResourceClient};
pub use conditions::{Condition, ConditionStatus, HasConditions, READY};
pub use config::{load_config, ConfigError, ConfigSource};
pub use error::{ErrorKind, OperatorError, OperatorResult};
pub use lifecycle::{BoxFuture, Requeue, Subroutine, SubroutineResult};
pub use logging::{init_tracing, LogFormat, LoggingConfig};
pub use lookup::{BindingLookup, ListAndFilter, ModelLookup};
pub use memory::InMemoryClient;
pub use meta::{ObjectKey, ObjectMeta, Resource};
pub use resources::*;
pub use scheme::Scheme;
pub use watch::{EventType, WatchEvent, WatchSource};
