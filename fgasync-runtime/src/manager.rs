//! Runs an object's subroutines and keeps its finalizers and conditions.

use fgasync_core::client::{optional, ClientError, ResourceClient};
use fgasync_core::conditions::{set_condition, Condition, ConditionStatus, HasConditions, READY};
use fgasync_core::error::OperatorError;
use fgasync_core::lifecycle::{Requeue, Subroutine};
use fgasync_core::meta::{ObjectKey, Resource};
use std::sync::Arc;

const COMPLETE: &str = "Complete";
const FINALIZED: &str = "Finalized";

/// Drives one reconcile of a `T`.
///
/// Live objects: declared finalizers are added (and persisted) first, then
/// every subroutine's `process` runs in registration order. Deleting
/// objects: `finalize` runs in reverse order, and each subroutine's
/// finalizers are removed as soon as its `finalize` succeeds.
///
/// Each subroutine gets a condition named after it, plus a summarising
/// [`READY`] condition. Status is written back only when it changed, and
/// also when a subroutine fails so progress made before the failure is kept.
pub struct LifecycleManager<T: Resource, C> {
    client: C,
    subroutines: Vec<Arc<dyn Subroutine<T>>>,
}

impl<T, C> LifecycleManager<T, C>
where
    T: Resource + HasConditions,
    C: ResourceClient,
{
    pub fn new(client: C) -> Self {
        Self {
            client,
            subroutines: Vec::new(),
        }
    }

    pub fn with_subroutine(mut self, subroutine: impl Subroutine<T>) -> Self {
        self.subroutines.push(Arc::new(subroutine));
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn subroutine_names(&self) -> Vec<&'static str> {
        self.subroutines.iter().map(|s| s.name()).collect()
    }

    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Requeue, OperatorError> {
        let Some(object) = optional(self.client.get::<T>(key).await)? else {
            tracing::debug!(kind = T::KIND, key = %key, "Object is gone");
            return Ok(None);
        };
        if object.meta().is_deleting() {
            self.finalize(object).await
        } else {
            self.process(object).await
        }
    }

    async fn process(&self, mut object: T) -> Result<Requeue, OperatorError> {
        let mut added = false;
        for subroutine in &self.subroutines {
            for finalizer in subroutine.finalizers() {
                added |= object.meta_mut().add_finalizer(&finalizer);
            }
        }
        if added {
            object = self.client.update(&object).await?;
            tracing::debug!(kind = T::KIND, key = %object.key(), "Added finalizers");
        }

        let original = snapshot(&object)?;
        let generation = object.meta().generation;

        if object.conditions().is_empty() {
            for subroutine in &self.subroutines {
                if let Err(err) = subroutine.initialize(&mut object).await {
                    return self.fail(object, &original, subroutine.name(), err).await;
                }
            }
        }

        let mut requeue: Requeue = None;
        for subroutine in &self.subroutines {
            match subroutine.process(&mut object).await {
                Ok(next) => {
                    set_condition(
                        object.conditions_mut(),
                        Condition::new(subroutine.name(), ConditionStatus::True, COMPLETE, "")
                            .with_generation(generation),
                    );
                    requeue = earliest(requeue, next);
                }
                Err(err) => return self.fail(object, &original, subroutine.name(), err).await,
            }
        }

        set_condition(
            object.conditions_mut(),
            Condition::new(READY, ConditionStatus::True, COMPLETE, "").with_generation(generation),
        );
        self.persist(&object, &original).await?;
        Ok(requeue)
    }

    async fn finalize(&self, mut object: T) -> Result<Requeue, OperatorError> {
        let owned: Vec<String> = self
            .subroutines
            .iter()
            .flat_map(|s| s.finalizers())
            .collect();
        if !owned.iter().any(|f| object.meta().has_finalizer(f)) {
            return Ok(None);
        }

        let original = snapshot(&object)?;
        let generation = object.meta().generation;

        for subroutine in self.subroutines.iter().rev() {
            let finalizers = subroutine.finalizers();
            // Without a finalizer of its own, a subroutine is always called.
            if !finalizers.is_empty() && !finalizers.iter().any(|f| object.meta().has_finalizer(f)) {
                continue;
            }
            match subroutine.finalize(&mut object).await {
                Ok(_) => {
                    for finalizer in &finalizers {
                        object.meta_mut().remove_finalizer(finalizer);
                    }
                    set_condition(
                        object.conditions_mut(),
                        Condition::new(subroutine.name(), ConditionStatus::True, FINALIZED, "")
                            .with_generation(generation),
                    );
                }
                Err(err) => return self.fail(object, &original, subroutine.name(), err).await,
            }
        }

        for subroutine in &self.subroutines {
            if let Err(err) = subroutine.terminate(&mut object).await {
                return self.fail(object, &original, subroutine.name(), err).await;
            }
        }

        self.persist(&object, &original).await?;
        tracing::info!(kind = T::KIND, key = %object.key(), "Released finalizers");
        Ok(None)
    }

    /// Record `err` on the subroutine's condition and on `Ready`, persist
    /// whatever changed, and hand the error back.
    async fn fail(
        &self,
        mut object: T,
        original: &serde_json::Value,
        subroutine: &str,
        err: OperatorError,
    ) -> Result<Requeue, OperatorError> {
        let generation = object.meta().generation;
        let reason = err.kind().reason();
        set_condition(
            object.conditions_mut(),
            Condition::new(subroutine, ConditionStatus::False, reason, err.message())
                .with_generation(generation),
        );
        set_condition(
            object.conditions_mut(),
            Condition::new(
                READY,
                ConditionStatus::False,
                reason,
                format!("{subroutine}: {}", err.message()),
            )
            .with_generation(generation),
        );
        if let Err(persist_err) = self.persist(&object, original).await {
            tracing::warn!(
                kind = T::KIND,
                key = %object.key(),
                error = %persist_err,
                "Failed to record reconcile failure"
            );
        }
        Err(err)
    }

    async fn persist(&self, object: &T, original: &serde_json::Value) -> Result<(), OperatorError> {
        if snapshot(object)? == *original {
            return Ok(());
        }
        self.client.update(object).await?;
        Ok(())
    }
}

fn snapshot<T: Resource>(object: &T) -> Result<serde_json::Value, OperatorError> {
    serde_json::to_value(object).map_err(|e| ClientError::Serialization(e.to_string()).into())
}

fn earliest(a: Requeue, b: Requeue) -> Requeue {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fgasync_core::conditions::find_condition;
    use fgasync_core::error::ErrorKind;
    use fgasync_core::lifecycle::{BoxFuture, SubroutineResult};
    use fgasync_core::memory::InMemoryClient;
    use fgasync_core::resources::Store;
    use std::sync::Mutex;
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<String>>>;

    #[derive(Clone, Copy, PartialEq)]
    enum Fail {
        Never,
        Process,
        Finalize,
    }

    struct Step {
        name: &'static str,
        finalizer: Option<&'static str>,
        fail: Fail,
        requeue: Option<Duration>,
        log: Log,
    }

    impl Step {
        fn new(name: &'static str, finalizer: Option<&'static str>, log: &Log) -> Self {
            Self {
                name,
                finalizer,
                fail: Fail::Never,
                requeue: None,
                log: log.clone(),
            }
        }

        fn failing(mut self, fail: Fail) -> Self {
            self.fail = fail;
            self
        }

        fn requeue_after(mut self, delay: Duration) -> Self {
            self.requeue = Some(delay);
            self
        }

        fn record(&self, event: &str, store: &Store) {
            let finalizers = store.meta.finalizers.join(",");
            self.log
                .lock()
                .unwrap()
                .push(format!("{event}:{} [{finalizers}]", self.name));
        }
    }

    impl Subroutine<Store> for Step {
        fn name(&self) -> &'static str {
            self.name
        }

        fn finalizers(&self) -> Vec<String> {
            self.finalizer.map(str::to_string).into_iter().collect()
        }

        fn process<'a>(&'a self, store: &'a mut Store) -> BoxFuture<'a, SubroutineResult> {
            self.record("process", store);
            let result = if self.fail == Fail::Process {
                Err(OperatorError::retryable(ErrorKind::Backend, "remote unavailable"))
            } else {
                store.status.store_id = format!("{}-id", self.name);
                Ok(self.requeue)
            };
            Box::pin(std::future::ready(result))
        }

        fn finalize<'a>(&'a self, store: &'a mut Store) -> BoxFuture<'a, SubroutineResult> {
            self.record("finalize", store);
            let result = if self.fail == Fail::Finalize {
                Err(OperatorError::blocked("dependents remain"))
            } else {
                Ok(None)
            };
            Box::pin(std::future::ready(result))
        }

        fn initialize<'a>(&'a self, store: &'a mut Store) -> BoxFuture<'a, SubroutineResult> {
            self.record("initialize", store);
            Box::pin(std::future::ready(Ok(None)))
        }

        fn terminate<'a>(&'a self, store: &'a mut Store) -> BoxFuture<'a, SubroutineResult> {
            self.record("terminate", store);
            Box::pin(std::future::ready(Ok(None)))
        }
    }

    fn entries(log: &Log) -> Vec<String> {
        std::mem::take(&mut *log.lock().unwrap())
    }

    async fn seeded() -> (InMemoryClient, ObjectKey) {
        let client = InMemoryClient::default();
        let store = client
            .create(&Store::new("root:orgs", "acme", "module core\ntype user"))
            .await
            .unwrap();
        (client, store.key())
    }

    #[tokio::test]
    async fn test_finalizers_are_persisted_before_processing() {
        let (client, key) = seeded().await;
        let log = Log::default();
        let manager = LifecycleManager::new(client.clone())
            .with_subroutine(Step::new("a", Some("test/a"), &log))
            .with_subroutine(Step::new("b", None, &log))
            .with_subroutine(Step::new("c", Some("test/c"), &log));

        manager.reconcile(&key).await.unwrap();

        assert_eq!(
            entries(&log),
            vec![
                "initialize:a [test/a,test/c]",
                "initialize:b [test/a,test/c]",
                "initialize:c [test/a,test/c]",
                "process:a [test/a,test/c]",
                "process:b [test/a,test/c]",
                "process:c [test/a,test/c]",
            ]
        );
        let stored: Store = client.get(&key).await.unwrap();
        assert_eq!(stored.meta.finalizers, vec!["test/a", "test/c"]);
        for name in ["a", "b", "c", READY] {
            assert!(find_condition(&stored.status.conditions, name).unwrap().is_true(), "{name}");
        }
    }

    #[tokio::test]
    async fn test_initialize_only_runs_without_conditions() {
        let (client, key) = seeded().await;
        let log = Log::default();
        let manager = LifecycleManager::new(client).with_subroutine(Step::new("a", None, &log));

        manager.reconcile(&key).await.unwrap();
        entries(&log);
        manager.reconcile(&key).await.unwrap();

        assert_eq!(entries(&log), vec!["process:a []"]);
    }

    #[tokio::test]
    async fn test_unchanged_reconcile_does_not_write() {
        let (client, key) = seeded().await;
        let log = Log::default();
        let manager = LifecycleManager::new(client.clone()).with_subroutine(Step::new("a", Some("test/a"), &log));

        manager.reconcile(&key).await.unwrap();
        let first: Store = client.get(&key).await.unwrap();
        manager.reconcile(&key).await.unwrap();
        let second: Store = client.get(&key).await.unwrap();

        assert_eq!(first.meta.resource_version, second.meta.resource_version);
    }

    #[tokio::test]
    async fn test_failure_stops_later_subroutines_and_keeps_progress() {
        let (client, key) = seeded().await;
        let log = Log::default();
        let manager = LifecycleManager::new(client.clone())
            .with_subroutine(Step::new("a", None, &log))
            .with_subroutine(Step::new("b", None, &log).failing(Fail::Process))
            .with_subroutine(Step::new("c", None, &log));

        let err = manager.reconcile(&key).await.unwrap_err();
        assert!(err.is_retryable());

        let processed: Vec<String> = entries(&log)
            .into_iter()
            .filter(|e| e.starts_with("process"))
            .collect();
        assert_eq!(processed, vec!["process:a []", "process:b []"]);

        let stored: Store = client.get(&key).await.unwrap();
        assert_eq!(stored.status.store_id, "a-id");
        let failed = find_condition(&stored.status.conditions, "b").unwrap();
        assert_eq!(failed.status, ConditionStatus::False);
        assert_eq!(failed.reason, "BackendError");
        let ready = find_condition(&stored.status.conditions, READY).unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.message, "b: remote unavailable");
    }

    #[tokio::test]
    async fn test_earliest_requeue_wins() {
        let (client, key) = seeded().await;
        let log = Log::default();
        let manager = LifecycleManager::new(client)
            .with_subroutine(Step::new("a", None, &log).requeue_after(Duration::from_secs(30)))
            .with_subroutine(Step::new("b", None, &log).requeue_after(Duration::from_secs(5)));

        let requeue = manager.reconcile(&key).await.unwrap();
        assert_eq!(requeue, Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_deletion_finalizes_in_reverse_and_releases_object() {
        let (client, key) = seeded().await;
        let log = Log::default();
        let manager = LifecycleManager::new(client.clone())
            .with_subroutine(Step::new("a", Some("test/a"), &log))
            .with_subroutine(Step::new("b", None, &log))
            .with_subroutine(Step::new("c", Some("test/c"), &log));
        manager.reconcile(&key).await.unwrap();
        entries(&log);

        client.delete::<Store>(&key).await.unwrap();
        manager.reconcile(&key).await.unwrap();

        assert_eq!(
            entries(&log),
            vec![
                "finalize:c [test/a,test/c]",
                "finalize:b [test/a]",
                "finalize:a [test/a]",
                "terminate:a []",
                "terminate:b []",
                "terminate:c []",
            ]
        );
        assert!(!client.contains::<Store>(&key));
    }

    #[tokio::test]
    async fn test_blocked_finalize_keeps_remaining_finalizers() {
        let (client, key) = seeded().await;
        let log = Log::default();
        let manager = LifecycleManager::new(client.clone())
            .with_subroutine(Step::new("a", Some("test/a"), &log).failing(Fail::Finalize))
            .with_subroutine(Step::new("c", Some("test/c"), &log));
        manager.reconcile(&key).await.unwrap();

        client.delete::<Store>(&key).await.unwrap();
        let err = manager.reconcile(&key).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BlockedByDependents);

        let stored: Store = client.get(&key).await.unwrap();
        assert_eq!(stored.meta.finalizers, vec!["test/a"]);
        let ready = find_condition(&stored.status.conditions, READY).unwrap();
        assert_eq!(ready.reason, "BlockedByDependents");
    }

    #[tokio::test]
    async fn test_finalize_skips_subroutines_whose_finalizer_is_gone() {
        let (client, key) = seeded().await;
        let log = Log::default();
        let manager = LifecycleManager::new(client.clone())
            .with_subroutine(Step::new("a", Some("test/a"), &log))
            .with_subroutine(Step::new("c", Some("test/c"), &log));
        manager.reconcile(&key).await.unwrap();

        let mut store: Store = client.get(&key).await.unwrap();
        store.meta.remove_finalizer("test/c");
        client.update(&store).await.unwrap();
        client.delete::<Store>(&key).await.unwrap();
        entries(&log);

        manager.reconcile(&key).await.unwrap();
        let finalized: Vec<String> = entries(&log)
            .into_iter()
            .filter(|e| e.starts_with("finalize"))
            .collect();
        assert_eq!(finalized, vec!["finalize:a [test/a]"]);
    }

    #[tokio::test]
    async fn test_missing_object_is_not_an_error() {
        let client = InMemoryClient::default();
        let manager: LifecycleManager<Store, _> = LifecycleManager::new(client);
        let requeue = manager
            .reconcile(&ObjectKey::new("root:orgs", "ghost"))
            .await
            .unwrap();
        assert_eq!(requeue, None);
    }
}
