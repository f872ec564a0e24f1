//! Backend trait and the OpenFGA gRPC implementation.
//!
//! [`FgaBackend`] is the seam every reconciler talks to. Provided
//! implementations:
//! - [`GrpcBackend`]: production client wrapping `openfga-rs`
//! - [`MockBackend`](crate::mock::MockBackend): in-memory fake for tests

use crate::config::OpenFgaConfig;
use crate::convert::{
    from_proto_model, to_proto_type_definitions, to_tuple_key, to_tuple_key_without_condition,
};
use crate::error::FgaError;
use fgasync_core::resources::Tuple;
use fgasync_schema::AuthorizationModel;
use openfga_rs::open_fga_service_client::OpenFgaServiceClient;
use openfga_rs::tonic;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::Channel;

pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, FgaError>> + Send + 'a>>;

/// A remote store as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStore {
    pub id: String,
    pub name: String,
}

/// One page of [`FgaBackend::list_stores`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorePage {
    pub stores: Vec<RemoteStore>,
    /// `None` on the last page.
    pub continuation_token: Option<String>,
}

/// Remote operations the reconcilers need.
///
/// Implementations classify "not found" and "already exists" into
/// [`FgaError::NotFound`] and [`FgaError::Duplicate`]; callers decide when
/// those count as success.
pub trait FgaBackend: Send + Sync + 'static {
    fn list_stores(&self, continuation_token: Option<String>) -> BackendFuture<'_, StorePage>;

    fn create_store(&self, name: &str) -> BackendFuture<'_, RemoteStore>;

    fn get_store(&self, store_id: &str) -> BackendFuture<'_, RemoteStore>;

    fn update_store(&self, store_id: &str, name: &str) -> BackendFuture<'_, RemoteStore>;

    fn delete_store(&self, store_id: &str) -> BackendFuture<'_, ()>;

    /// Returns the id of the new model.
    fn write_authorization_model(
        &self,
        store_id: &str,
        model: &AuthorizationModel,
    ) -> BackendFuture<'_, String>;

    fn read_authorization_model(
        &self,
        store_id: &str,
        model_id: &str,
    ) -> BackendFuture<'_, AuthorizationModel>;

    /// Apply `writes` and `deletes` in one request. `model_id` may be empty.
    fn write_tuples(
        &self,
        store_id: &str,
        model_id: &str,
        writes: &[Tuple],
        deletes: &[Tuple],
    ) -> BackendFuture<'_, ()>;
}

impl<B: FgaBackend + ?Sized> FgaBackend for Arc<B> {
    fn list_stores(&self, continuation_token: Option<String>) -> BackendFuture<'_, StorePage> {
        (**self).list_stores(continuation_token)
    }

    fn create_store(&self, name: &str) -> BackendFuture<'_, RemoteStore> {
        (**self).create_store(name)
    }

    fn get_store(&self, store_id: &str) -> BackendFuture<'_, RemoteStore> {
        (**self).get_store(store_id)
    }

    fn update_store(&self, store_id: &str, name: &str) -> BackendFuture<'_, RemoteStore> {
        (**self).update_store(store_id, name)
    }

    fn delete_store(&self, store_id: &str) -> BackendFuture<'_, ()> {
        (**self).delete_store(store_id)
    }

    fn write_authorization_model(
        &self,
        store_id: &str,
        model: &AuthorizationModel,
    ) -> BackendFuture<'_, String> {
        (**self).write_authorization_model(store_id, model)
    }

    fn read_authorization_model(
        &self,
        store_id: &str,
        model_id: &str,
    ) -> BackendFuture<'_, AuthorizationModel> {
        (**self).read_authorization_model(store_id, model_id)
    }

    fn write_tuples(
        &self,
        store_id: &str,
        model_id: &str,
        writes: &[Tuple],
        deletes: &[Tuple],
    ) -> BackendFuture<'_, ()> {
        (**self).write_tuples(store_id, model_id, writes, deletes)
    }
}

// ── GrpcBackend ────────────────────────────────────────────────────────

/// gRPC backend wrapping the `openfga-rs` client.
///
/// The tonic client is cheap to clone (shares the underlying HTTP/2 channel).
#[derive(Clone)]
pub struct GrpcBackend {
    client: OpenFgaServiceClient<Channel>,
    api_token: Option<String>,
}

impl GrpcBackend {
    pub async fn connect(config: &OpenFgaConfig) -> Result<Self, FgaError> {
        config.validate()?;

        let endpoint = tonic::transport::Endpoint::from_shared(config.endpoint.clone())
            .map_err(|e| FgaError::ConnectionFailed(e.to_string()))?
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs));

        let channel = endpoint.connect().await?;
        tracing::info!(endpoint = %config.endpoint, "Connected to OpenFGA");

        Ok(Self {
            client: OpenFgaServiceClient::new(channel),
            api_token: config.api_token.clone(),
        })
    }

    /// The raw gRPC client, for calls this crate does not wrap.
    pub fn client(&self) -> &OpenFgaServiceClient<Channel> {
        &self.client
    }

    /// Build a `tonic::Request`, injecting the Bearer token if configured.
    fn make_request<T>(&self, msg: T) -> Result<tonic::Request<T>, FgaError> {
        let mut request = tonic::Request::new(msg);
        if let Some(token) = &self.api_token {
            request.metadata_mut().insert(
                "authorization",
                format!("Bearer {token}").parse().map_err(
                    |e: tonic::metadata::errors::InvalidMetadataValue| {
                        FgaError::InvalidConfig(format!("invalid api-token for header: {e}"))
                    },
                )?,
            );
        }
        Ok(request)
    }
}

impl FgaBackend for GrpcBackend {
    fn list_stores(&self, continuation_token: Option<String>) -> BackendFuture<'_, StorePage> {
        let req = openfga_rs::ListStoresRequest {
            continuation_token: continuation_token.unwrap_or_default(),
            ..Default::default()
        };
        Box::pin(async move {
            let resp = self
                .client
                .clone()
                .list_stores(self.make_request(req)?)
                .await?
                .into_inner();
            Ok(StorePage {
                stores: resp
                    .stores
                    .into_iter()
                    .map(|s| RemoteStore {
                        id: s.id,
                        name: s.name,
                    })
                    .collect(),
                continuation_token: Some(resp.continuation_token).filter(|t| !t.is_empty()),
            })
        })
    }

    fn create_store(&self, name: &str) -> BackendFuture<'_, RemoteStore> {
        let req = openfga_rs::CreateStoreRequest {
            name: name.to_string(),
            ..Default::default()
        };
        Box::pin(async move {
            let resp = self
                .client
                .clone()
                .create_store(self.make_request(req)?)
                .await?
                .into_inner();
            Ok(RemoteStore {
                id: resp.id,
                name: resp.name,
            })
        })
    }

    fn get_store(&self, store_id: &str) -> BackendFuture<'_, RemoteStore> {
        let req = openfga_rs::GetStoreRequest {
            store_id: store_id.to_string(),
            ..Default::default()
        };
        Box::pin(async move {
            let resp = self
                .client
                .clone()
                .get_store(self.make_request(req)?)
                .await?
                .into_inner();
            Ok(RemoteStore {
                id: resp.id,
                name: resp.name,
            })
        })
    }

    fn update_store(&self, store_id: &str, name: &str) -> BackendFuture<'_, RemoteStore> {
        let req = openfga_rs::UpdateStoreRequest {
            store_id: store_id.to_string(),
            name: name.to_string(),
            ..Default::default()
        };
        Box::pin(async move {
            let resp = self
                .client
                .clone()
                .update_store(self.make_request(req)?)
                .await?
                .into_inner();
            Ok(RemoteStore {
                id: resp.id,
                name: resp.name,
            })
        })
    }

    fn delete_store(&self, store_id: &str) -> BackendFuture<'_, ()> {
        let req = openfga_rs::DeleteStoreRequest {
            store_id: store_id.to_string(),
            ..Default::default()
        };
        Box::pin(async move {
            self.client
                .clone()
                .delete_store(self.make_request(req)?)
                .await?;
            Ok(())
        })
    }

    fn write_authorization_model(
        &self,
        store_id: &str,
        model: &AuthorizationModel,
    ) -> BackendFuture<'_, String> {
        let req = openfga_rs::WriteAuthorizationModelRequest {
            store_id: store_id.to_string(),
            type_definitions: to_proto_type_definitions(model),
            schema_version: model.schema_version.to_string(),
            ..Default::default()
        };
        Box::pin(async move {
            let resp = self
                .client
                .clone()
                .write_authorization_model(self.make_request(req)?)
                .await?
                .into_inner();
            Ok(resp.authorization_model_id)
        })
    }

    fn read_authorization_model(
        &self,
        store_id: &str,
        model_id: &str,
    ) -> BackendFuture<'_, AuthorizationModel> {
        let req = openfga_rs::ReadAuthorizationModelRequest {
            store_id: store_id.to_string(),
            id: model_id.to_string(),
            ..Default::default()
        };
        let model_id = model_id.to_string();
        Box::pin(async move {
            let resp = self
                .client
                .clone()
                .read_authorization_model(self.make_request(req)?)
                .await?
                .into_inner();
            let model = resp
                .authorization_model
                .ok_or_else(|| FgaError::NotFound(format!("authorization model {model_id}")))?;
            from_proto_model(model)
        })
    }

    fn write_tuples(
        &self,
        store_id: &str,
        model_id: &str,
        writes: &[Tuple],
        deletes: &[Tuple],
    ) -> BackendFuture<'_, ()> {
        let req = openfga_rs::WriteRequest {
            store_id: store_id.to_string(),
            authorization_model_id: model_id.to_string(),
            writes: (!writes.is_empty()).then(|| openfga_rs::WriteRequestWrites {
                tuple_keys: writes.iter().map(to_tuple_key).collect(),
                ..Default::default()
            }),
            deletes: (!deletes.is_empty()).then(|| openfga_rs::WriteRequestDeletes {
                tuple_keys: deletes.iter().map(to_tuple_key_without_condition).collect(),
                ..Default::default()
            }),
            ..Default::default()
        };
        Box::pin(async move {
            self.client.clone().write(self.make_request(req)?).await?;
            Ok(())
        })
    }
}
