//! In-memory [`ResourceClient`] with optimistic concurrency and watch events.
//!
//! Objects are stored as JSON snapshots so callers never share state with
//! the store. Used by tests and by embedders that drive fgasync without an
//! external API server.

use crate::client::{ClientError, ListScope, ResourceClient};
use crate::meta::{ObjectKey, Resource};
use crate::scheme::Scheme;
use crate::watch::{EventType, WatchEvent, WatchSource};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

type StoreKey = (&'static str, ObjectKey);

#[derive(Clone)]
pub struct InMemoryClient {
    inner: Arc<Inner>,
}

struct Inner {
    scheme: Scheme,
    objects: DashMap<StoreKey, serde_json::Value>,
    events: broadcast::Sender<WatchEvent>,
}

impl InMemoryClient {
    pub fn new(scheme: Scheme) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                scheme,
                objects: DashMap::new(),
                events,
            }),
        }
    }

    /// Number of objects of kind `R` currently stored.
    pub fn count<R: Resource>(&self) -> usize {
        self.inner
            .objects
            .iter()
            .filter(|entry| entry.key().0 == R::KIND)
            .count()
    }

    pub fn contains<R: Resource>(&self, key: &ObjectKey) -> bool {
        self.inner.objects.contains_key(&(R::KIND, key.clone()))
    }

    fn check_kind<R: Resource>(&self) -> Result<(), ClientError> {
        if self.inner.scheme.contains::<R>() {
            Ok(())
        } else {
            Err(ClientError::UnknownKind(R::KIND))
        }
    }

    fn emit<R: Resource>(&self, key: ObjectKey, event_type: EventType, object: serde_json::Value) {
        // No subscribers is fine.
        let _ = self.inner.events.send(WatchEvent {
            kind: R::KIND,
            key,
            event_type,
            object: Arc::new(object),
        });
    }

    fn get_now<R: Resource>(&self, key: &ObjectKey) -> Result<R, ClientError> {
        self.check_kind::<R>()?;
        let value = self
            .inner
            .objects
            .get(&(R::KIND, key.clone()))
            .map(|v| v.value().clone())
            .ok_or_else(|| ClientError::NotFound {
                kind: R::KIND,
                key: key.clone(),
            })?;
        decode(value)
    }

    fn list_now<R: Resource>(&self, scope: &ListScope) -> Result<Vec<R>, ClientError> {
        self.check_kind::<R>()?;
        let mut snapshots: Vec<(ObjectKey, serde_json::Value)> = self
            .inner
            .objects
            .iter()
            .filter(|entry| entry.key().0 == R::KIND && scope.contains(&entry.key().1.path))
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect();
        snapshots.sort_by(|a, b| a.0.cmp(&b.0));
        snapshots.into_iter().map(|(_, v)| decode(v)).collect()
    }

    fn create_now<R: Resource>(&self, object: &R) -> Result<R, ClientError> {
        self.check_kind::<R>()?;
        let key = object.key();
        let mut stored = object.clone();
        stored.meta_mut().resource_version = 1;
        stored.meta_mut().generation = 1;
        stored.meta_mut().deletion_timestamp = None;
        let value = encode(&stored)?;

        match self.inner.objects.entry((R::KIND, key.clone())) {
            Entry::Occupied(_) => {
                return Err(ClientError::AlreadyExists {
                    kind: R::KIND,
                    key,
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(value.clone());
            }
        }
        self.emit::<R>(key, EventType::Added, value);
        Ok(stored)
    }

    fn update_now<R: Resource>(&self, object: &R) -> Result<R, ClientError> {
        self.check_kind::<R>()?;
        let key = object.key();
        let map_key = (R::KIND, key.clone());

        let (stored, value, removed) = {
            let mut current = self
                .inner
                .objects
                .get_mut(&map_key)
                .ok_or_else(|| ClientError::NotFound {
                    kind: R::KIND,
                    key: key.clone(),
                })?;
            let existing: R = decode(current.value().clone())?;
            let actual = existing.meta().resource_version;
            let expected = object.meta().resource_version;
            if actual != expected {
                return Err(ClientError::Conflict {
                    kind: R::KIND,
                    key,
                    expected,
                    actual,
                });
            }

            let mut stored = object.clone();
            // Deletion is only requested through `delete`.
            stored.meta_mut().deletion_timestamp = existing.meta().deletion_timestamp;
            stored.meta_mut().resource_version = actual + 1;
            let spec_changed = encode(&stored)?.get("spec") != current.value().get("spec");
            stored.meta_mut().generation = if spec_changed {
                existing.meta().generation + 1
            } else {
                existing.meta().generation
            };
            let value = encode(&stored)?;

            let removed = stored.meta().is_deleting() && stored.meta().finalizers.is_empty();
            if !removed {
                *current.value_mut() = value.clone();
            }
            (stored, value, removed)
        };

        if removed {
            self.inner.objects.remove(&map_key);
            self.emit::<R>(key, EventType::Deleted, value);
        } else {
            self.emit::<R>(key, EventType::Modified, value);
        }
        Ok(stored)
    }

    fn delete_now<R: Resource>(&self, key: &ObjectKey) -> Result<(), ClientError> {
        self.check_kind::<R>()?;
        let map_key = (R::KIND, key.clone());

        let outcome = {
            let mut current = self
                .inner
                .objects
                .get_mut(&map_key)
                .ok_or_else(|| ClientError::NotFound {
                    kind: R::KIND,
                    key: key.clone(),
                })?;
            let mut existing: R = decode(current.value().clone())?;
            if existing.meta().finalizers.is_empty() {
                Some((EventType::Deleted, current.value().clone()))
            } else if existing.meta().is_deleting() {
                None
            } else {
                let meta = existing.meta_mut();
                meta.deletion_timestamp = Some(Utc::now());
                meta.resource_version += 1;
                let value = encode(&existing)?;
                *current.value_mut() = value.clone();
                Some((EventType::Modified, value))
            }
        };

        match outcome {
            Some((EventType::Deleted, value)) => {
                self.inner.objects.remove(&map_key);
                self.emit::<R>(key.clone(), EventType::Deleted, value);
            }
            Some((event_type, value)) => self.emit::<R>(key.clone(), event_type, value),
            None => {}
        }
        Ok(())
    }
}

impl Default for InMemoryClient {
    fn default() -> Self {
        Self::new(Scheme::with_defaults())
    }
}

impl ResourceClient for InMemoryClient {
    fn get<R: Resource>(&self, key: &ObjectKey) -> impl Future<Output = Result<R, ClientError>> + Send {
        std::future::ready(self.get_now(key))
    }

    fn list<R: Resource>(&self, scope: &ListScope) -> impl Future<Output = Result<Vec<R>, ClientError>> + Send {
        std::future::ready(self.list_now(scope))
    }

    fn create<R: Resource>(&self, object: &R) -> impl Future<Output = Result<R, ClientError>> + Send {
        std::future::ready(self.create_now(object))
    }

    fn update<R: Resource>(&self, object: &R) -> impl Future<Output = Result<R, ClientError>> + Send {
        std::future::ready(self.update_now(object))
    }

    fn delete<R: Resource>(&self, key: &ObjectKey) -> impl Future<Output = Result<(), ClientError>> + Send {
        std::future::ready(self.delete_now::<R>(key))
    }
}

impl WatchSource for InMemoryClient {
    fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.inner.events.subscribe()
    }
}

fn encode<R: Resource>(object: &R) -> Result<serde_json::Value, ClientError> {
    serde_json::to_value(object).map_err(|e| ClientError::Serialization(e.to_string()))
}

fn decode<R: Resource>(value: serde_json::Value) -> Result<R, ClientError> {
    serde_json::from_value(value).map_err(|e| ClientError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{ApiBinding, ExportRef, Store};

    #[tokio::test]
    async fn test_create_and_get() {
        let client = InMemoryClient::default();
        let created = client
            .create(&Store::new("root:orgs", "acme", "module core"))
            .await
            .unwrap();
        assert_eq!(created.meta.resource_version, 1);

        let fetched: Store = client.get(&created.key()).await.unwrap();
        assert_eq!(fetched.spec.core_module, "module core");
    }

    #[tokio::test]
    async fn test_create_twice_fails() {
        let client = InMemoryClient::default();
        let store = Store::new("root:orgs", "acme", "");
        client.create(&store).await.unwrap();
        let err = client.create(&store).await.unwrap_err();
        assert!(matches!(err, ClientError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let client = InMemoryClient::default();
        let created = client.create(&Store::new("root:orgs", "acme", "")).await.unwrap();

        let mut first = created.clone();
        first.status.store_id = "a".into();
        client.update(&first).await.unwrap();

        let mut second = created;
        second.status.store_id = "b".into();
        let err = client.update(&second).await.unwrap_err();
        assert!(matches!(err, ClientError::Conflict { expected: 1, actual: 2, .. }));
    }

    #[tokio::test]
    async fn test_generation_bumps_on_spec_change_only() {
        let client = InMemoryClient::default();
        let created = client.create(&Store::new("root:orgs", "acme", "")).await.unwrap();

        let mut status_only = created.clone();
        status_only.status.store_id = "id".into();
        let after_status = client.update(&status_only).await.unwrap();
        assert_eq!(after_status.meta.generation, 1);

        let mut spec_change = after_status.clone();
        spec_change.spec.core_module = "module core".into();
        let after_spec = client.update(&spec_change).await.unwrap();
        assert_eq!(after_spec.meta.generation, 2);
    }

    #[tokio::test]
    async fn test_delete_with_finalizers_marks_then_removes() {
        let client = InMemoryClient::default();
        let mut store = Store::new("root:orgs", "acme", "");
        store.meta.add_finalizer("fgasync.io/store");
        let created = client.create(&store).await.unwrap();

        client.delete::<Store>(&created.key()).await.unwrap();
        let marked: Store = client.get(&created.key()).await.unwrap();
        assert!(marked.meta.is_deleting());

        let mut released = marked;
        released.meta.remove_finalizer("fgasync.io/store");
        client.update(&released).await.unwrap();
        assert!(!client.contains::<Store>(&created.key()));
    }

    #[tokio::test]
    async fn test_list_scope_filters_workspaces() {
        let client = InMemoryClient::default();
        let export = ExportRef::new("widgets", "root:providers");
        client
            .create(&ApiBinding::new("root:orgs:acme:a", "widgets", export.clone()))
            .await
            .unwrap();
        client
            .create(&ApiBinding::new("root:orgs:other", "widgets", export))
            .await
            .unwrap();

        let acme: Vec<ApiBinding> = client
            .list(&ListScope::Subtree("root:orgs:acme".into()))
            .await
            .unwrap();
        assert_eq!(acme.len(), 1);
        let all: Vec<ApiBinding> = client.list(&ListScope::All).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_unregistered_kind_is_rejected() {
        let client = InMemoryClient::new(Scheme::new().register::<Store>());
        let err = client
            .list::<ApiBinding>(&ListScope::All)
            .await
            .unwrap_err();
        assert_eq!(err, ClientError::UnknownKind("APIBinding"));
    }

    #[tokio::test]
    async fn test_watch_receives_events() {
        let client = InMemoryClient::default();
        let mut rx = client.subscribe();
        let created = client.create(&Store::new("root:orgs", "acme", "")).await.unwrap();
        client.delete::<Store>(&created.key()).await.unwrap();

        let added = rx.recv().await.unwrap();
        assert_eq!(added.event_type, EventType::Added);
        assert!(added.is::<Store>());
        let deleted = rx.recv().await.unwrap();
        assert_eq!(deleted.event_type, EventType::Deleted);
        assert_eq!(deleted.decode::<Store>().unwrap().meta.name, "acme");
    }
}
