//! Reconcile subroutines that keep an FGA backend in sync with resources.
//!
//! | Subroutine          | Object               | Finalizer                    |
//! |---------------------|----------------------|------------------------------|
//! | [`StoreSync`]       | `Store`              | `fgasync.io/store`           |
//! | [`ModelComposer`]   | `Store`              | none                         |
//! | [`TupleReconciler`] | `Store`              | `fgasync.io/store-tuples`    |
//! | [`TupleReconciler`] | `AuthorizationModel` | `fgasync.io/model-tuples`    |
//! | [`ModelGenerator`]  | `ApiBinding`         | `fgasync.io/generated-model` |
//!
//! Each implements [`Subroutine`](fgasync_core::Subroutine); ordering,
//! finalizers and conditions are handled by the runtime.

pub mod composer;
pub mod diff;
pub mod generator;
pub mod store;
pub mod tuples;

pub use composer::ModelComposer;
pub use diff::{diff, TupleDiff};
pub use generator::{
    generated_model_name, render_module, GeneratorConfig, ModelGenerator, ResourceNaming,
    GENERATED_MODEL_FINALIZER, MAX_RELATION_LENGTH,
};
pub use store::{StoreSync, STORE_FINALIZER};
pub use tuples::{
    TargetIds, TupleReconciler, TupleTarget, MODEL_TUPLES_FINALIZER, STORE_TUPLES_FINALIZER,
};
