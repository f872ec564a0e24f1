//! FGA backend for fgasync.
//!
//! The reconcilers only ever see [`FgaBackend`]: stores, authorization
//! models and tuple writes. [`GrpcBackend`] talks to an OpenFGA server over
//! gRPC; [`MockBackend`] keeps everything in memory for tests.
//!
//! ```ignore
//! use fgasync_openfga::{GrpcBackend, OpenFgaConfig};
//!
//! let config = OpenFgaConfig::new("http://localhost:8081").with_api_token("secret");
//! let backend = GrpcBackend::connect(&config).await?;
//! let page = backend.list_stores(None).await?;
//! ```
//!
//! `NotFound` becomes [`FgaError::NotFound`] and `AlreadyExists` becomes
//! [`FgaError::Duplicate`]. OpenFGA's own codes (an existing tuple written,
//! a missing tuple deleted, an unknown store or model) arrive as `Unknown`
//! and are mapped the same way through [`OpenFgaFailure`].

pub mod backend;
pub mod config;
pub mod convert;
pub mod error;
pub mod mock;

// Re-export openfga-rs so users can access raw types.
pub use openfga_rs;

pub use backend::{BackendFuture, FgaBackend, GrpcBackend, RemoteStore, StorePage};
pub use config::{OpenFgaConfig, OPENFGA_MAX_TUPLES_PER_WRITE};
pub use error::{FgaError, OpenFgaFailure};
pub use mock::{BackendCall, MockBackend, Operation};
