//! Remote store lifecycle.

use fgasync_core::error::{ErrorKind, OperatorError};
use fgasync_core::lifecycle::{BoxFuture, Subroutine, SubroutineResult};
use fgasync_core::lookup::ModelLookup;
use fgasync_core::meta::Resource;
use fgasync_core::resources::Store;
use fgasync_openfga::{FgaBackend, FgaError, RemoteStore};
use std::sync::Arc;

pub const STORE_FINALIZER: &str = "fgasync.io/store";

/// Finds or creates the remote store of a [`Store`] and keeps its display
/// name equal to the object's name.
///
/// The remote id is recorded once in `status.storeId` and never changes
/// afterwards. Deleting the object deletes the remote store, unless an
/// [`AuthorizationModel`](fgasync_core::resources::AuthorizationModel) still
/// references it.
pub struct StoreSync<L> {
    fga: Arc<dyn FgaBackend>,
    models: L,
}

/// Refuse teardown of `store` while any
/// [`AuthorizationModel`](fgasync_core::resources::AuthorizationModel) still
/// references it.
pub async fn ensure_no_dependents<L: ModelLookup>(models: &L, store: &Store) -> Result<(), OperatorError> {
    let dependents = models.models_for_store(&store.store_ref()).await?;
    if dependents.is_empty() {
        return Ok(());
    }

    let key = store.key();
    let names: Vec<String> = dependents.iter().map(|m| m.key().to_string()).collect();
    tracing::warn!(
        store = %key,
        dependents = %names.join(", "),
        "Store deletion blocked by authorization models"
    );
    Err(OperatorError::blocked(format!(
        "store {key} is still referenced by {} authorization model(s): {}",
        names.len(),
        names.join(", ")
    )))
}

impl<L: ModelLookup + 'static> StoreSync<L> {
    pub fn new(fga: Arc<dyn FgaBackend>, models: L) -> Self {
        Self { fga, models }
    }

    /// Linear scan over every page of remote stores.
    async fn find_by_name(&self, name: &str) -> Result<Option<RemoteStore>, FgaError> {
        let mut token = None;
        loop {
            let page = self.fga.list_stores(token).await?;
            if let Some(found) = page.stores.into_iter().find(|s| s.name == name) {
                return Ok(Some(found));
            }
            match page.continuation_token {
                Some(next) => token = Some(next),
                None => return Ok(None),
            }
        }
    }

    async fn create_or_adopt(&self, store: &mut Store) -> SubroutineResult {
        let key = store.key();
        let name = store.meta.name.clone();
        let remote = match self.find_by_name(&name).await? {
            Some(existing) => {
                tracing::info!(store = %key, store_id = %existing.id, "Adopted existing remote store");
                existing
            }
            None => {
                let created = self.fga.create_store(&name).await?;
                tracing::info!(store = %key, store_id = %created.id, "Created remote store");
                created
            }
        };
        store.status.store_id = remote.id;
        Ok(None)
    }

    async fn sync_name(&self, store: &mut Store) -> SubroutineResult {
        let key = store.key();
        let store_id = store.status.store_id.clone();
        let remote = self.fga.get_store(&store_id).await.map_err(|err| {
            if err.is_not_found() {
                OperatorError::retryable(
                    ErrorKind::Backend,
                    format!("remote store {store_id} recorded on {key} does not exist"),
                )
                .with_source(err)
            } else {
                err.into()
            }
        })?;

        if remote.name == store.meta.name {
            tracing::debug!(store = %key, store_id = %store_id, "Remote store up to date");
            return Ok(None);
        }
        self.fga.update_store(&store_id, &store.meta.name).await?;
        tracing::info!(
            store = %key,
            store_id = %store_id,
            from = %remote.name,
            to = %store.meta.name,
            "Renamed remote store"
        );
        Ok(None)
    }
}

impl<L: ModelLookup + 'static> Subroutine<Store> for StoreSync<L> {
    fn name(&self) -> &'static str {
        "StoreSync"
    }

    fn finalizers(&self) -> Vec<String> {
        vec![STORE_FINALIZER.to_string()]
    }

    fn process<'a>(&'a self, store: &'a mut Store) -> BoxFuture<'a, SubroutineResult> {
        Box::pin(async move {
            if store.status.store_id.is_empty() {
                self.create_or_adopt(store).await
            } else {
                self.sync_name(store).await
            }
        })
    }

    fn finalize<'a>(&'a self, store: &'a mut Store) -> BoxFuture<'a, SubroutineResult> {
        Box::pin(async move {
            let key = store.key();
            if store.status.store_id.is_empty() {
                tracing::debug!(store = %key, "No remote store to delete");
                return Ok(None);
            }

            ensure_no_dependents(&self.models, store).await?;

            let store_id = std::mem::take(&mut store.status.store_id);
            match self.fga.delete_store(&store_id).await {
                Ok(()) => tracing::info!(store = %key, store_id = %store_id, "Deleted remote store"),
                Err(err) if err.is_not_found() => {
                    tracing::debug!(store = %key, store_id = %store_id, "Remote store already gone")
                }
                Err(err) => {
                    store.status.store_id = store_id;
                    return Err(err.into());
                }
            }
            store.status.authorization_model_id.clear();
            Ok(None)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fgasync_core::client::{ListScope, ResourceClient};
    use fgasync_core::lookup::ListAndFilter;
    use fgasync_core::memory::InMemoryClient;
    use fgasync_core::resources::AuthorizationModel;
    use fgasync_openfga::{MockBackend, Operation};

    fn sync(mock: &Arc<MockBackend>, client: &InMemoryClient) -> StoreSync<ListAndFilter<InMemoryClient>> {
        StoreSync::new(mock.clone(), ListAndFilter::new(client.clone(), ListScope::All))
    }

    #[tokio::test]
    async fn test_creates_remote_store_when_none_matches() {
        let mock = Arc::new(MockBackend::new());
        mock.add_store("someone-else");
        let client = InMemoryClient::default();
        let mut store = Store::new("root:orgs", "acme", "");

        sync(&mock, &client).process(&mut store).await.unwrap();

        assert!(!store.status.store_id.is_empty());
        assert_eq!(mock.store_name(&store.status.store_id).as_deref(), Some("acme"));
        assert_eq!(mock.calls_of(Operation::CreateStore).len(), 1);
    }

    #[tokio::test]
    async fn test_adopts_remote_store_on_a_later_page() {
        let mock = Arc::new(MockBackend::new().with_page_size(2));
        for i in 0..5 {
            mock.add_store(&format!("tenant-{i}"));
        }
        let existing = mock.add_store("acme");
        let client = InMemoryClient::default();
        let mut store = Store::new("root:orgs", "acme", "");

        sync(&mock, &client).process(&mut store).await.unwrap();

        assert_eq!(store.status.store_id, existing);
        assert_eq!(mock.calls_of(Operation::ListStores).len(), 3);
        assert!(mock.calls_of(Operation::CreateStore).is_empty());
    }

    #[tokio::test]
    async fn test_renames_on_display_name_drift() {
        let mock = Arc::new(MockBackend::new());
        let client = InMemoryClient::default();
        let mut store = Store::new("root:orgs", "acme-renamed", "");
        store.status.store_id = mock.add_store("acme");

        sync(&mock, &client).process(&mut store).await.unwrap();

        assert_eq!(mock.store_name(&store.status.store_id).as_deref(), Some("acme-renamed"));
        assert_eq!(mock.calls_of(Operation::UpdateStore).len(), 1);
    }

    #[tokio::test]
    async fn test_matching_name_is_a_no_op() {
        let mock = Arc::new(MockBackend::new());
        let client = InMemoryClient::default();
        let mut store = Store::new("root:orgs", "acme", "");
        store.status.store_id = mock.add_store("acme");

        sync(&mock, &client).process(&mut store).await.unwrap();

        assert!(mock.calls_of(Operation::UpdateStore).is_empty());
    }

    #[tokio::test]
    async fn test_missing_remote_store_is_retryable_and_keeps_id() {
        let mock = Arc::new(MockBackend::new());
        let client = InMemoryClient::default();
        let mut store = Store::new("root:orgs", "acme", "");
        store.status.store_id = "vanished".into();

        let err = sync(&mock, &client).process(&mut store).await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(store.status.store_id, "vanished");
        assert!(mock.calls_of(Operation::CreateStore).is_empty());
    }

    #[tokio::test]
    async fn test_finalize_blocked_by_dependents() {
        let mock = Arc::new(MockBackend::new());
        let client = InMemoryClient::default();
        let mut store = Store::new("root:orgs", "acme", "");
        store.status.store_id = mock.add_store("acme");
        client
            .create(&AuthorizationModel::new("root:orgs:acme", "docs", store.store_ref(), ""))
            .await
            .unwrap();

        let err = sync(&mock, &client).finalize(&mut store).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::BlockedByDependents);
        assert!(!err.is_retryable());
        assert!(!err.is_fatal());
        assert!(mock.has_store(&store.status.store_id));
    }

    #[tokio::test]
    async fn test_finalize_deletes_remote_store() {
        let mock = Arc::new(MockBackend::new());
        let client = InMemoryClient::default();
        let mut store = Store::new("root:orgs", "acme", "");
        let store_id = mock.add_store("acme");
        store.status.store_id = store_id.clone();
        store.status.authorization_model_id = "model-1".into();

        sync(&mock, &client).finalize(&mut store).await.unwrap();

        assert!(!mock.has_store(&store_id));
        assert!(store.status.store_id.is_empty());
        assert!(store.status.authorization_model_id.is_empty());
    }

    #[tokio::test]
    async fn test_finalize_treats_missing_remote_store_as_deleted() {
        let mock = Arc::new(MockBackend::new());
        let client = InMemoryClient::default();
        let mut store = Store::new("root:orgs", "acme", "");
        store.status.store_id = "already-gone".into();

        sync(&mock, &client).finalize(&mut store).await.unwrap();
        assert!(store.status.store_id.is_empty());
    }

    #[tokio::test]
    async fn test_finalize_failure_keeps_store_id() {
        let mock = Arc::new(MockBackend::new());
        let client = InMemoryClient::default();
        let mut store = Store::new("root:orgs", "acme", "");
        store.status.store_id = mock.add_store("acme");
        mock.fail_next(Operation::DeleteStore, FgaError::Timeout);

        let err = sync(&mock, &client).finalize(&mut store).await.unwrap_err();

        assert!(err.is_retryable());
        assert!(!store.status.store_id.is_empty());
    }

    #[tokio::test]
    async fn test_finalize_without_remote_store_is_immediate() {
        let mock = Arc::new(MockBackend::new());
        let client = InMemoryClient::default();
        let mut store = Store::new("root:orgs", "acme", "");

        sync(&mock, &client).finalize(&mut store).await.unwrap();
        assert!(mock.calls().is_empty());
    }
}
