//! In-memory [`FgaBackend`] for tests.
//!
//! Keeps stores, models and tuples in memory and records every call so tests
//! can assert on the exact remote traffic a reconcile produced.
//!
//! ```ignore
//! let mock = Arc::new(MockBackend::new());
//! let store_id = mock.add_store("acme");
//! mock.fail_next(Operation::WriteTuples, FgaError::ServerError("boom".into()));
//!
//! // ... run a reconcile against `mock.clone()` ...
//!
//! assert_eq!(mock.calls_of(Operation::WriteTuples).len(), 1);
//! ```

use crate::backend::{BackendFuture, FgaBackend, RemoteStore, StorePage};
use crate::error::{FgaError, OpenFgaFailure};
use dashmap::DashMap;
use fgasync_core::resources::Tuple;
use fgasync_schema::AuthorizationModel;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

const DEFAULT_PAGE_SIZE: usize = 50;

/// Backend operation, used to filter recorded calls and to inject failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListStores,
    CreateStore,
    GetStore,
    UpdateStore,
    DeleteStore,
    WriteAuthorizationModel,
    ReadAuthorizationModel,
    WriteTuples,
}

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    ListStores { continuation_token: Option<String> },
    CreateStore { name: String },
    GetStore { store_id: String },
    UpdateStore { store_id: String, name: String },
    DeleteStore { store_id: String },
    WriteAuthorizationModel { store_id: String },
    ReadAuthorizationModel { store_id: String, model_id: String },
    WriteTuples {
        store_id: String,
        model_id: String,
        writes: Vec<Tuple>,
        deletes: Vec<Tuple>,
    },
}

impl BackendCall {
    pub fn operation(&self) -> Operation {
        match self {
            BackendCall::ListStores { .. } => Operation::ListStores,
            BackendCall::CreateStore { .. } => Operation::CreateStore,
            BackendCall::GetStore { .. } => Operation::GetStore,
            BackendCall::UpdateStore { .. } => Operation::UpdateStore,
            BackendCall::DeleteStore { .. } => Operation::DeleteStore,
            BackendCall::WriteAuthorizationModel { .. } => Operation::WriteAuthorizationModel,
            BackendCall::ReadAuthorizationModel { .. } => Operation::ReadAuthorizationModel,
            BackendCall::WriteTuples { .. } => Operation::WriteTuples,
        }
    }
}

#[derive(Debug, Default)]
struct MockStore {
    name: String,
    /// In write order; the last entry is the latest model.
    models: Vec<(String, AuthorizationModel)>,
    tuples: BTreeSet<Tuple>,
}

pub struct MockBackend {
    /// Insertion order of store ids, for stable pagination.
    order: Mutex<Vec<String>>,
    stores: DashMap<String, MockStore>,
    calls: Mutex<Vec<BackendCall>>,
    failures: Mutex<HashMap<Operation, VecDeque<FgaError>>>,
    strict_tuples: AtomicBool,
    page_size: usize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            order: Mutex::new(Vec::new()),
            stores: DashMap::new(),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            strict_tuples: AtomicBool::new(false),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Page size for `list_stores`.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Reject writes of existing tuples and deletes of missing tuples with
    /// the statuses a real server sends. Off by default.
    pub fn set_strict_tuples(&self, strict: bool) {
        self.strict_tuples.store(strict, Ordering::SeqCst);
    }

    /// Make the next call of `operation` fail with `error`. Queued errors
    /// are consumed in order.
    pub fn fail_next(&self, operation: Operation, error: FgaError) {
        lock(&self.failures)
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Seed a store and return its id.
    pub fn add_store(&self, name: &str) -> String {
        let id = new_id();
        self.insert_store(&id, name);
        id
    }

    pub fn has_store(&self, store_id: &str) -> bool {
        self.stores.contains_key(store_id)
    }

    pub fn store_name(&self, store_id: &str) -> Option<String> {
        self.stores.get(store_id).map(|s| s.name.clone())
    }

    pub fn store_count(&self) -> usize {
        self.stores.len()
    }

    /// Seed tuples directly, bypassing call recording.
    pub fn add_tuples(&self, store_id: &str, tuples: &[Tuple]) {
        if let Some(mut store) = self.stores.get_mut(store_id) {
            store.tuples.extend(tuples.iter().cloned());
        }
    }

    pub fn tuples(&self, store_id: &str) -> Vec<Tuple> {
        self.stores
            .get(store_id)
            .map(|s| s.tuples.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Seed a model directly and return its id.
    pub fn add_model(&self, store_id: &str, model: AuthorizationModel) -> Option<String> {
        let id = new_id();
        self.stores
            .get_mut(store_id)
            .map(|mut s| s.models.push((id.clone(), model)))?;
        Some(id)
    }

    pub fn model_count(&self, store_id: &str) -> usize {
        self.stores.get(store_id).map(|s| s.models.len()).unwrap_or(0)
    }

    pub fn latest_model(&self, store_id: &str) -> Option<(String, AuthorizationModel)> {
        self.stores.get(store_id).and_then(|s| s.models.last().cloned())
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        lock(&self.calls).clone()
    }

    pub fn calls_of(&self, operation: Operation) -> Vec<BackendCall> {
        lock(&self.calls)
            .iter()
            .filter(|c| c.operation() == operation)
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    fn insert_store(&self, id: &str, name: &str) {
        self.stores.insert(
            id.to_string(),
            MockStore {
                name: name.to_string(),
                ..Default::default()
            },
        );
        lock(&self.order).push(id.to_string());
    }

    /// Record the call and pop an injected failure, if any.
    fn enter(&self, call: BackendCall) -> Result<(), FgaError> {
        let operation = call.operation();
        lock(&self.calls).push(call);
        match lock(&self.failures)
            .get_mut(&operation)
            .and_then(VecDeque::pop_front)
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Missing stores and models fail with OpenFGA's own statuses, decoded
    /// the same way as those of [`GrpcBackend`](crate::backend::GrpcBackend).
    fn store_not_found() -> FgaError {
        OpenFgaFailure::StoreNotFound.status("").into()
    }

    fn list_now(&self, continuation_token: Option<String>) -> Result<StorePage, FgaError> {
        self.enter(BackendCall::ListStores {
            continuation_token: continuation_token.clone(),
        })?;
        let start = match continuation_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| FgaError::ServerError(format!("invalid continuation token '{token}'")))?,
            None => 0,
        };
        let order = lock(&self.order).clone();
        let stores: Vec<RemoteStore> = order
            .iter()
            .skip(start)
            .take(self.page_size)
            .filter_map(|id| {
                self.stores.get(id).map(|s| RemoteStore {
                    id: id.clone(),
                    name: s.name.clone(),
                })
            })
            .collect();
        let next = start + self.page_size;
        Ok(StorePage {
            stores,
            continuation_token: (next < order.len()).then(|| next.to_string()),
        })
    }

    fn create_now(&self, name: &str) -> Result<RemoteStore, FgaError> {
        self.enter(BackendCall::CreateStore {
            name: name.to_string(),
        })?;
        let id = new_id();
        self.insert_store(&id, name);
        Ok(RemoteStore {
            id,
            name: name.to_string(),
        })
    }

    fn get_now(&self, store_id: &str) -> Result<RemoteStore, FgaError> {
        self.enter(BackendCall::GetStore {
            store_id: store_id.to_string(),
        })?;
        self.stores
            .get(store_id)
            .map(|s| RemoteStore {
                id: store_id.to_string(),
                name: s.name.clone(),
            })
            .ok_or_else(Self::store_not_found)
    }

    fn update_now(&self, store_id: &str, name: &str) -> Result<RemoteStore, FgaError> {
        self.enter(BackendCall::UpdateStore {
            store_id: store_id.to_string(),
            name: name.to_string(),
        })?;
        let mut store = self
            .stores
            .get_mut(store_id)
            .ok_or_else(Self::store_not_found)?;
        store.name = name.to_string();
        Ok(RemoteStore {
            id: store_id.to_string(),
            name: name.to_string(),
        })
    }

    fn delete_now(&self, store_id: &str) -> Result<(), FgaError> {
        self.enter(BackendCall::DeleteStore {
            store_id: store_id.to_string(),
        })?;
        self.stores
            .remove(store_id)
            .ok_or_else(Self::store_not_found)?;
        lock(&self.order).retain(|id| id != store_id);
        Ok(())
    }

    fn write_model_now(&self, store_id: &str, model: &AuthorizationModel) -> Result<String, FgaError> {
        self.enter(BackendCall::WriteAuthorizationModel {
            store_id: store_id.to_string(),
        })?;
        let mut store = self
            .stores
            .get_mut(store_id)
            .ok_or_else(Self::store_not_found)?;
        let id = new_id();
        store.models.push((id.clone(), model.clone()));
        Ok(id)
    }

    fn read_model_now(&self, store_id: &str, model_id: &str) -> Result<AuthorizationModel, FgaError> {
        self.enter(BackendCall::ReadAuthorizationModel {
            store_id: store_id.to_string(),
            model_id: model_id.to_string(),
        })?;
        let store = self
            .stores
            .get(store_id)
            .ok_or_else(Self::store_not_found)?;
        store
            .models
            .iter()
            .find(|(id, _)| id == model_id)
            .map(|(_, model)| model.clone())
            .ok_or_else(|| OpenFgaFailure::ModelNotFound.status(model_id).into())
    }

    fn write_tuples_now(
        &self,
        store_id: &str,
        model_id: &str,
        writes: &[Tuple],
        deletes: &[Tuple],
    ) -> Result<(), FgaError> {
        self.enter(BackendCall::WriteTuples {
            store_id: store_id.to_string(),
            model_id: model_id.to_string(),
            writes: writes.to_vec(),
            deletes: deletes.to_vec(),
        })?;
        let mut store = self
            .stores
            .get_mut(store_id)
            .ok_or_else(Self::store_not_found)?;

        // The whole request is rejected if any tuple fails, as on a real server.
        if self.strict_tuples.load(Ordering::SeqCst) {
            if let Some(existing) = writes.iter().find(|t| store.tuples.contains(*t)) {
                return Err(OpenFgaFailure::TupleExists.status(&existing.to_string()).into());
            }
            if let Some(missing) = deletes.iter().find(|t| !store.tuples.contains(*t)) {
                return Err(OpenFgaFailure::TupleMissing.status(&missing.to_string()).into());
            }
        }
        for tuple in deletes {
            store.tuples.remove(tuple);
        }
        store.tuples.extend(writes.iter().cloned());
        Ok(())
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FgaBackend for MockBackend {
    fn list_stores(&self, continuation_token: Option<String>) -> BackendFuture<'_, StorePage> {
        let result = self.list_now(continuation_token);
        Box::pin(async move { result })
    }

    fn create_store(&self, name: &str) -> BackendFuture<'_, RemoteStore> {
        let result = self.create_now(name);
        Box::pin(async move { result })
    }

    fn get_store(&self, store_id: &str) -> BackendFuture<'_, RemoteStore> {
        let result = self.get_now(store_id);
        Box::pin(async move { result })
    }

    fn update_store(&self, store_id: &str, name: &str) -> BackendFuture<'_, RemoteStore> {
        let result = self.update_now(store_id, name);
        Box::pin(async move { result })
    }

    fn delete_store(&self, store_id: &str) -> BackendFuture<'_, ()> {
        let result = self.delete_now(store_id);
        Box::pin(async move { result })
    }

    fn write_authorization_model(
        &self,
        store_id: &str,
        model: &AuthorizationModel,
    ) -> BackendFuture<'_, String> {
        let result = self.write_model_now(store_id, model);
        Box::pin(async move { result })
    }

    fn read_authorization_model(
        &self,
        store_id: &str,
        model_id: &str,
    ) -> BackendFuture<'_, AuthorizationModel> {
        let result = self.read_model_now(store_id, model_id);
        Box::pin(async move { result })
    }

    fn write_tuples(
        &self,
        store_id: &str,
        model_id: &str,
        writes: &[Tuple],
        deletes: &[Tuple],
    ) -> BackendFuture<'_, ()> {
        let result = self.write_tuples_now(store_id, model_id, writes, deletes);
        Box::pin(async move { result })
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Lock a mutex, recovering from poisoning.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
