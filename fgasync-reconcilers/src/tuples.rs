//! Relationship-tuple reconciliation.
//!
//! [`TupleReconciler`] converges the remote tuples of one object onto its
//! declared `spec.tuples`. The object's `status.managedTuples` records what
//! was applied last; the remote store is never read back to rebuild it.
//!
//! The same subroutine serves [`Store`] and [`AuthorizationModel`] through
//! the [`TupleTarget`] capability.

use crate::diff::{dedup, diff};
use crate::store::ensure_no_dependents;
use fgasync_core::client::{optional, ClientError, ListScope, ResourceClient};
use fgasync_core::error::{ErrorKind, OperatorError};
use fgasync_core::lifecycle::{BoxFuture, Subroutine, SubroutineResult};
use fgasync_core::lookup::ListAndFilter;
use fgasync_core::meta::Resource;
use fgasync_core::resources::{AuthorizationModel, Store, Tuple};
use fgasync_openfga::{FgaBackend, FgaError, OPENFGA_MAX_TUPLES_PER_WRITE};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

pub const STORE_TUPLES_FINALIZER: &str = "fgasync.io/store-tuples";
pub const MODEL_TUPLES_FINALIZER: &str = "fgasync.io/model-tuples";

/// Remote store and model a target's tuples are written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetIds {
    pub store_id: String,
    /// May be empty; the backend then uses the store's latest model.
    pub model_id: String,
}

impl TargetIds {
    fn of(store: &Store) -> Option<Self> {
        if store.status.store_id.is_empty() {
            return None;
        }
        Some(Self {
            store_id: store.status.store_id.clone(),
            model_id: store.status.authorization_model_id.clone(),
        })
    }
}

/// An object that declares tuples and records the ones it applied.
pub trait TupleTarget: Resource {
    /// Finalizer guarding the removal of this object's remote tuples.
    const FINALIZER: &'static str;

    fn declared_tuples(&self) -> &[Tuple];

    fn managed_tuples(&self) -> &[Tuple];

    fn set_managed_tuples(&mut self, tuples: Vec<Tuple>);

    /// Resolve the remote ids to write to. `Ok(None)` means there is no
    /// remote store: the owning [`Store`] object is gone or has not been
    /// synced yet.
    fn resolve_target<C: ResourceClient>(
        &self,
        client: &C,
    ) -> impl Future<Output = Result<Option<TargetIds>, ClientError>> + Send;

    /// Refuse to delete the remote tuples while other objects still depend
    /// on them.
    fn check_teardown<C: ResourceClient>(
        &self,
        _client: &C,
    ) -> impl Future<Output = Result<(), OperatorError>> + Send {
        std::future::ready(Ok(()))
    }
}

impl TupleTarget for Store {
    const FINALIZER: &'static str = STORE_TUPLES_FINALIZER;

    fn declared_tuples(&self) -> &[Tuple] {
        &self.spec.tuples
    }

    fn managed_tuples(&self) -> &[Tuple] {
        &self.status.managed_tuples
    }

    fn set_managed_tuples(&mut self, tuples: Vec<Tuple>) {
        self.status.managed_tuples = tuples;
    }

    fn resolve_target<C: ResourceClient>(
        &self,
        _client: &C,
    ) -> impl Future<Output = Result<Option<TargetIds>, ClientError>> + Send {
        std::future::ready(Ok(TargetIds::of(self)))
    }

    /// A store keeps its tuples for as long as it is kept itself.
    fn check_teardown<C: ResourceClient>(
        &self,
        client: &C,
    ) -> impl Future<Output = Result<(), OperatorError>> + Send {
        let models = ListAndFilter::new(client.clone(), ListScope::All);
        async move { ensure_no_dependents(&models, self).await }
    }
}

impl TupleTarget for AuthorizationModel {
    const FINALIZER: &'static str = MODEL_TUPLES_FINALIZER;

    fn declared_tuples(&self) -> &[Tuple] {
        &self.spec.tuples
    }

    fn managed_tuples(&self) -> &[Tuple] {
        &self.status.managed_tuples
    }

    fn set_managed_tuples(&mut self, tuples: Vec<Tuple>) {
        self.status.managed_tuples = tuples;
    }

    fn resolve_target<C: ResourceClient>(
        &self,
        client: &C,
    ) -> impl Future<Output = Result<Option<TargetIds>, ClientError>> + Send {
        let key = self.spec.store_ref.key();
        let client = client.clone();
        async move {
            let store: Option<Store> = optional(client.get(&key).await)?;
            Ok(store.as_ref().and_then(TargetIds::of))
        }
    }
}

// ── Batching ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Write,
    Delete,
}

impl Direction {
    /// Duplicate on write and missing on delete leave the remote state as
    /// requested.
    fn absorbs(self, err: &FgaError) -> bool {
        match self {
            Direction::Write => err.is_duplicate(),
            Direction::Delete => err.is_not_found(),
        }
    }

    async fn send(
        self,
        fga: &dyn FgaBackend,
        target: &TargetIds,
        tuples: &[Tuple],
    ) -> Result<(), FgaError> {
        match self {
            Direction::Write => {
                fga.write_tuples(&target.store_id, &target.model_id, tuples, &[])
                    .await
            }
            Direction::Delete => {
                fga.write_tuples(&target.store_id, &target.model_id, &[], tuples)
                    .await
            }
        }
    }
}

// ── TupleReconciler ────────────────────────────────────────────────────

pub struct TupleReconciler<C, T> {
    client: C,
    fga: Arc<dyn FgaBackend>,
    batch_size: usize,
    _target: PhantomData<fn() -> T>,
}

impl<C: ResourceClient, T: TupleTarget> TupleReconciler<C, T> {
    pub fn new(client: C, fga: Arc<dyn FgaBackend>) -> Self {
        Self {
            client,
            fga,
            batch_size: OPENFGA_MAX_TUPLES_PER_WRITE,
            _target: PhantomData,
        }
    }

    /// Tuples per write request, clamped to `1..=100`.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, OPENFGA_MAX_TUPLES_PER_WRITE);
        self
    }

    /// Send `tuples` in batches. A batch rejected as duplicate/missing is
    /// retried one tuple at a time so each rejection is absorbed on its own.
    async fn apply(
        &self,
        direction: Direction,
        target: &TargetIds,
        tuples: &[Tuple],
    ) -> Result<(), FgaError> {
        for batch in tuples.chunks(self.batch_size) {
            match direction.send(self.fga.as_ref(), target, batch).await {
                Ok(()) => {}
                Err(err) if direction.absorbs(&err) && batch.len() > 1 => {
                    tracing::debug!(
                        store_id = %target.store_id,
                        batch = batch.len(),
                        error = %err,
                        "Batch rejected, retrying tuple by tuple"
                    );
                    for tuple in batch {
                        match direction.send(self.fga.as_ref(), target, std::slice::from_ref(tuple)).await {
                            Ok(()) => {}
                            Err(err) if direction.absorbs(&err) => {
                                tracing::debug!(tuple = %tuple, ?direction, "Tuple already in requested state");
                            }
                            Err(err) => return Err(err),
                        }
                    }
                }
                Err(err) if direction.absorbs(&err) => {
                    tracing::debug!(tuple = %batch[0], ?direction, "Tuple already in requested state");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

impl<C: ResourceClient, T: TupleTarget> Subroutine<T> for TupleReconciler<C, T> {
    fn name(&self) -> &'static str {
        "TupleReconciler"
    }

    fn finalizers(&self) -> Vec<String> {
        vec![T::FINALIZER.to_string()]
    }

    fn process<'a>(&'a self, object: &'a mut T) -> BoxFuture<'a, SubroutineResult> {
        Box::pin(async move {
            let changes = diff(object.declared_tuples(), object.managed_tuples());
            if changes.is_empty() {
                return Ok(None);
            }

            let key = object.key();
            let Some(target) = object.resolve_target(&self.client).await? else {
                return Err(OperatorError::retryable(
                    ErrorKind::PrerequisiteMissing,
                    format!("{} {key} has no remote store to write tuples to yet", T::KIND),
                ));
            };

            self.apply(Direction::Write, &target, &changes.writes).await?;
            self.apply(Direction::Delete, &target, &changes.deletes).await?;
            tracing::info!(
                kind = T::KIND,
                key = %key,
                store_id = %target.store_id,
                written = changes.writes.len(),
                deleted = changes.deletes.len(),
                "Reconciled tuples"
            );

            object.set_managed_tuples(changes.writes);
            Ok(None)
        })
    }

    fn finalize<'a>(&'a self, object: &'a mut T) -> BoxFuture<'a, SubroutineResult> {
        Box::pin(async move {
            let managed = dedup(object.managed_tuples());
            if managed.is_empty() {
                return Ok(None);
            }

            object.check_teardown(&self.client).await?;
            let key = object.key();
            match object.resolve_target(&self.client).await? {
                Some(target) => {
                    self.apply(Direction::Delete, &target, &managed).await?;
                    tracing::info!(
                        kind = T::KIND,
                        key = %key,
                        store_id = %target.store_id,
                        deleted = managed.len(),
                        "Deleted managed tuples"
                    );
                }
                None => {
                    tracing::debug!(
                        kind = T::KIND,
                        key = %key,
                        count = managed.len(),
                        "Remote store is gone, dropping managed tuples"
                    );
                }
            }
            object.set_managed_tuples(Vec::new());
            Ok(None)
        })
    }
}
