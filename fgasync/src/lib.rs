//! fgasync keeps an OpenFGA backend convergent with declarative resources.
//!
//! `Store` objects become remote stores whose authorization model is
//! composed from a core module plus every `AuthorizationModel` that
//! references the store. `APIBinding`s generate such models from the bound
//! API's resource schemas. Tuples declared on stores and models are written
//! and deleted as the declarations change.
//!
//! This facade re-exports the sub-crates and wires them together:
//!
//! ```ignore
//! use fgasync::prelude::*;
//!
//! let config = OperatorConfig::load()?;
//! init_tracing(&config.logging)?;
//!
//! let client = InMemoryClient::default();
//! let operator = Operator::connect(client, config).await?;
//! operator.run(CancellationToken::new()).await;
//! ```
//!
//! | Crate                 | Provides                                             |
//! |-----------------------|------------------------------------------------------|
//! | `fgasync-core`        | resources, resource store, lookups, errors, config   |
//! | `fgasync-schema`      | FGA DSL parser, module composition, canonical text   |
//! | `fgasync-openfga`     | `FgaBackend`, gRPC and mock backends                 |
//! | `fgasync-reconcilers` | `StoreSync`, `ModelComposer`, `ModelGenerator`, `TupleReconciler` |
//! | `fgasync-runtime`     | lifecycle manager, work queue, controllers           |

pub extern crate fgasync_core;

pub use fgasync_core::*;
pub use fgasync_openfga;
pub use fgasync_reconcilers;
pub use fgasync_runtime;
pub use fgasync_schema;

pub mod config;
pub mod operator;

pub use config::OperatorConfig;
pub use operator::Operator;

/// Everything needed to configure and run the operator.
pub mod prelude {
    pub use crate::config::OperatorConfig;
    pub use crate::operator::Operator;
    pub use fgasync_core::{
        init_tracing, AuthorizationModel, InMemoryClient, ObjectKey, OperatorError, Resource,
        ResourceClient, Store, StoreRef, Tuple, WatchSource,
    };
    pub use fgasync_openfga::{FgaBackend, GrpcBackend, MockBackend, OpenFgaConfig};
    pub use fgasync_reconcilers::GeneratorConfig;
    pub use fgasync_runtime::ControllerConfig;
    pub use tokio_util::sync::CancellationToken;
}
