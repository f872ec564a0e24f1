//! Resource kinds reconciled by fgasync.
//!
//! - [`Store`] and [`AuthorizationModel`] describe the desired FGA state.
//! - [`ApiBinding`], [`ApiExport`] and [`ApiResourceSchema`] describe the API
//!   resources bound into tenant workspaces; they drive schema generation.

mod apis;
mod fga;

pub use apis::{
    ApiBinding, ApiBindingSpec, ApiBindingStatus, ApiExport, ApiExportSpec, ApiResourceSchema,
    ApiResourceSchemaSpec, BindingReference, BoundResource, ExportRef, ResourceNames,
    ResourceScope,
};
pub use fga::{
    AuthorizationModel, AuthorizationModelSpec, AuthorizationModelStatus, Store, StoreRef,
    StoreSpec, StoreStatus, Tuple,
};
