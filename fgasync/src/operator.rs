//! Wiring of the reconcilers into controllers.

use crate::config::OperatorConfig;
use fgasync_core::client::{ListScope, ResourceClient};
use fgasync_core::error::OperatorError;
use fgasync_core::lookup::ListAndFilter;
use fgasync_core::meta::ObjectKey;
use fgasync_core::resources::{ApiBinding, AuthorizationModel, Store};
use fgasync_core::watch::{WatchEvent, WatchSource};
use fgasync_openfga::{FgaBackend, GrpcBackend};
use fgasync_reconcilers::{ModelComposer, ModelGenerator, StoreSync, TupleReconciler};
use fgasync_runtime::{Controller, LifecycleManager};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Runs one controller per reconciled kind against a resource store and an
/// FGA backend.
///
/// | Kind                 | Subroutines                                        |
/// |----------------------|----------------------------------------------------|
/// | `Store`              | `StoreSync`, `ModelComposer`, `TupleReconciler`    |
/// | `AuthorizationModel` | `TupleReconciler`                                  |
/// | `APIBinding`         | `ModelGenerator`                                   |
///
/// Any change to an `AuthorizationModel` also re-queues the `Store` it
/// references, so composition and deletion blocking follow model changes.
pub struct Operator<C> {
    client: C,
    fga: Arc<dyn FgaBackend>,
    config: OperatorConfig,
}

impl<C> Operator<C>
where
    C: ResourceClient + WatchSource,
{
    pub fn new(client: C, fga: Arc<dyn FgaBackend>, config: OperatorConfig) -> Self {
        Self { client, fga, config }
    }

    /// Validate `config` and connect to the OpenFGA server it names.
    pub async fn connect(client: C, config: OperatorConfig) -> Result<Self, OperatorError> {
        config.validate()?;
        let backend = GrpcBackend::connect(&config.openfga).await?;
        Ok(Self::new(client, Arc::new(backend), config))
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    fn lookup(&self) -> ListAndFilter<C> {
        ListAndFilter::new(self.client.clone(), ListScope::All)
    }

    pub fn store_controller(&self) -> Controller<Store, C> {
        let manager = LifecycleManager::new(self.client.clone())
            .with_subroutine(StoreSync::new(self.fga.clone(), self.lookup()))
            .with_subroutine(ModelComposer::new(self.fga.clone(), self.lookup()))
            .with_subroutine(
                TupleReconciler::<C, Store>::new(self.client.clone(), self.fga.clone())
                    .with_batch_size(self.config.openfga.max_tuples_per_write),
            );
        Controller::new(manager, self.config.controller.clone()).watches(referenced_store)
    }

    pub fn model_controller(&self) -> Controller<AuthorizationModel, C> {
        let manager = LifecycleManager::new(self.client.clone()).with_subroutine(
            TupleReconciler::<C, AuthorizationModel>::new(self.client.clone(), self.fga.clone())
                .with_batch_size(self.config.openfga.max_tuples_per_write),
        );
        Controller::new(manager, self.config.controller.clone())
    }

    pub fn binding_controller(&self) -> Controller<ApiBinding, C> {
        let manager = LifecycleManager::new(self.client.clone()).with_subroutine(ModelGenerator::new(
            self.client.clone(),
            self.lookup(),
            self.config.generator.clone(),
        ));
        Controller::new(manager, self.config.controller.clone())
    }

    /// Run every controller until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let stores = self.store_controller();
        let models = self.model_controller();
        let bindings = self.binding_controller();
        tracing::info!("Starting fgasync operator");

        tokio::join!(
            stores.run(self.client.subscribe(), shutdown.clone()),
            models.run(self.client.subscribe(), shutdown.clone()),
            bindings.run(self.client.subscribe(), shutdown.clone()),
        );
        tracing::info!("fgasync operator stopped");
    }
}

/// The `Store` an `AuthorizationModel` event points at.
fn referenced_store(event: &WatchEvent) -> Vec<ObjectKey> {
    event
        .decode::<AuthorizationModel>()
        .map(|model| vec![model.spec.store_ref.key()])
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fgasync_core::memory::InMemoryClient;
    use fgasync_core::resources::StoreRef;
    use fgasync_openfga::MockBackend;

    #[tokio::test]
    async fn test_model_events_map_to_their_store() {
        let client = InMemoryClient::default();
        let mut events = client.subscribe();
        let model = AuthorizationModel::new(
            "root:orgs:acme",
            "docs",
            StoreRef::new("acme", "root:orgs"),
            "module docs\ntype doc",
        );
        client.create(&model).await.unwrap();

        let event = events.try_recv().unwrap();
        assert_eq!(referenced_store(&event), vec![ObjectKey::new("root:orgs", "acme")]);
    }

    #[test]
    fn test_store_controller_runs_subroutines_in_order() {
        let operator = Operator::new(
            InMemoryClient::default(),
            Arc::new(MockBackend::new()),
            OperatorConfig::default(),
        );
        assert_eq!(
            operator.store_controller().subroutine_names(),
            vec!["StoreSync", "ModelComposer", "TupleReconciler"]
        );
        assert_eq!(operator.model_controller().kind(), "AuthorizationModel");
        assert_eq!(
            operator.binding_controller().subroutine_names(),
            vec!["ModelGenerator"]
        );
    }
}
