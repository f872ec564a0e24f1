//! Composition of a store's authorization model from its modules.

use fgasync_core::error::{ErrorKind, OperatorError};
use fgasync_core::lifecycle::{BoxFuture, Subroutine, SubroutineResult};
use fgasync_core::lookup::ModelLookup;
use fgasync_core::meta::Resource;
use fgasync_core::resources::{AuthorizationModel, Store};
use fgasync_openfga::{FgaBackend, FgaError};
use fgasync_schema::{compile_modules, equivalent, ModuleFile, SchemaVersion};
use std::sync::Arc;

/// Merges a store's core module with every [`AuthorizationModel`] that
/// references the store, and writes the result only when it differs from
/// the model recorded in `status.authorizationModelId`.
///
/// Comparison is on the canonical text of both models, so reordering types,
/// relations or type restrictions never causes a write.
pub struct ModelComposer<L> {
    fga: Arc<dyn FgaBackend>,
    models: L,
    schema_version: SchemaVersion,
}

impl<L: ModelLookup + 'static> ModelComposer<L> {
    pub fn new(fga: Arc<dyn FgaBackend>, models: L) -> Self {
        Self {
            fga,
            models,
            schema_version: SchemaVersion::V1_1,
        }
    }

    /// The core module first, named after the store, then each live
    /// extension named `path/name`, sorted by that identity.
    async fn modules(&self, store: &Store) -> Result<Vec<ModuleFile>, OperatorError> {
        let mut extensions: Vec<AuthorizationModel> = self
            .models
            .models_for_store(&store.store_ref())
            .await?
            .into_iter()
            .filter(|m| !m.meta.is_deleting())
            .collect();
        extensions.sort_by_key(|m| m.key());

        let mut modules = Vec::with_capacity(extensions.len() + 1);
        modules.push(ModuleFile::new(
            store.meta.name.clone(),
            store.spec.core_module.clone(),
        ));
        modules.extend(
            extensions
                .into_iter()
                .map(|m| ModuleFile::new(m.key().to_string(), m.spec.model)),
        );
        Ok(modules)
    }
}

impl<L: ModelLookup + 'static> Subroutine<Store> for ModelComposer<L> {
    fn name(&self) -> &'static str {
        "ModelComposer"
    }

    fn process<'a>(&'a self, store: &'a mut Store) -> BoxFuture<'a, SubroutineResult> {
        Box::pin(async move {
            let key = store.key();
            if store.status.store_id.is_empty() {
                return Err(OperatorError::retryable(
                    ErrorKind::PrerequisiteMissing,
                    format!("store {key} has no remote store id yet"),
                ));
            }

            let modules = self.modules(store).await?;
            let model = compile_modules(&modules, self.schema_version)?;
            if model.type_definitions.is_empty() {
                return Err(OperatorError::fatal(format!(
                    "store {key} composes to a model without type definitions"
                )));
            }
            let store_id = store.status.store_id.clone();

            let model_id = &store.status.authorization_model_id;
            if !model_id.is_empty() {
                match self.fga.read_authorization_model(&store_id, model_id).await {
                    Ok(current) if equivalent(&current, &model) => {
                        tracing::debug!(store = %key, model_id = %model_id, "Authorization model unchanged");
                        return Ok(None);
                    }
                    Ok(_) => {
                        tracing::debug!(store = %key, model_id = %model_id, "Authorization model changed");
                    }
                    Err(err @ (FgaError::NotFound(_) | FgaError::Conversion(_))) => {
                        tracing::debug!(store = %key, model_id = %model_id, error = %err, "Stored model not comparable, rewriting");
                    }
                    Err(err) => return Err(err.into()),
                }
            }

            let written = self.fga.write_authorization_model(&store_id, &model).await?;
            tracing::info!(
                store = %key,
                store_id = %store_id,
                model_id = %written,
                modules = modules.len(),
                "Wrote authorization model"
            );
            store.status.authorization_model_id = written;
            Ok(None)
        })
    }
}
