//! Sibling lookups used by composition and garbage collection.
//!
//! No server-side index exists for `storeRef` or export references, so the
//! only implementation, [`ListAndFilter`], lists every object in its scope
//! and filters locally. This is linear in the number of objects; keep the
//! traits as the seam for an indexed implementation.

use crate::client::{ClientError, ListScope, ResourceClient};
use crate::resources::{ApiBinding, AuthorizationModel, ExportRef, StoreRef};
use std::future::Future;

/// Finds the [`AuthorizationModel`]s contributing to a store.
pub trait ModelLookup: Send + Sync {
    fn models_for_store(
        &self,
        store: &StoreRef,
    ) -> impl Future<Output = Result<Vec<AuthorizationModel>, ClientError>> + Send;
}

/// Finds the [`ApiBinding`]s that reference an export.
pub trait BindingLookup: Send + Sync {
    fn bindings_for_export(
        &self,
        export: &ExportRef,
    ) -> impl Future<Output = Result<Vec<ApiBinding>, ClientError>> + Send;
}

#[derive(Clone)]
pub struct ListAndFilter<C> {
    client: C,
    scope: ListScope,
}

impl<C: ResourceClient> ListAndFilter<C> {
    pub fn new(client: C, scope: ListScope) -> Self {
        Self { client, scope }
    }
}

impl<C: ResourceClient> ModelLookup for ListAndFilter<C> {
    fn models_for_store(
        &self,
        store: &StoreRef,
    ) -> impl Future<Output = Result<Vec<AuthorizationModel>, ClientError>> + Send {
        let store = store.clone();
        async move {
            let models: Vec<AuthorizationModel> = self.client.list(&self.scope).await?;
            Ok(models
                .into_iter()
                .filter(|m| m.spec.store_ref == store)
                .collect())
        }
    }
}

impl<C: ResourceClient> BindingLookup for ListAndFilter<C> {
    fn bindings_for_export(
        &self,
        export: &ExportRef,
    ) -> impl Future<Output = Result<Vec<ApiBinding>, ClientError>> + Send {
        let export = export.clone();
        async move {
            let bindings: Vec<ApiBinding> = self.client.list(&self.scope).await?;
            Ok(bindings
                .into_iter()
                .filter(|b| b.export() == &export)
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryClient;

    #[tokio::test]
    async fn test_models_for_store_filters_by_ref() {
        let client = InMemoryClient::default();
        let acme = StoreRef::new("acme", "root:orgs");
        client
            .create(&AuthorizationModel::new("root:orgs:acme", "a", acme.clone(), ""))
            .await
            .unwrap();
        client
            .create(&AuthorizationModel::new(
                "root:orgs:other",
                "b",
                StoreRef::new("other", "root:orgs"),
                "",
            ))
            .await
            .unwrap();

        let lookup = ListAndFilter::new(client, ListScope::All);
        let models = lookup.models_for_store(&acme).await.unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].meta.name, "a");
    }

    #[tokio::test]
    async fn test_bindings_for_export_matches_name_and_path() {
        let client = InMemoryClient::default();
        let export = ExportRef::new("widgets", "root:providers");
        client
            .create(&ApiBinding::new("root:orgs:acme", "w", export.clone()))
            .await
            .unwrap();
        client
            .create(&ApiBinding::new(
                "root:orgs:acme",
                "w2",
                ExportRef::new("widgets", "root:elsewhere"),
            ))
            .await
            .unwrap();

        let lookup = ListAndFilter::new(client, ListScope::All);
        let bindings = lookup.bindings_for_export(&export).await.unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].meta.name, "w");
    }
}
