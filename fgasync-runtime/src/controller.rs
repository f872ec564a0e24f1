//! Event-driven reconcile loop for one resource kind.

use crate::config::ControllerConfig;
use crate::manager::LifecycleManager;
use crate::queue::WorkQueue;
use fgasync_core::client::{ListScope, ResourceClient};
use fgasync_core::conditions::HasConditions;
use fgasync_core::meta::{ObjectKey, Resource};
use fgasync_core::watch::WatchEvent;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Maps a watch event about some other kind to the keys it affects.
pub type EventMapper = Arc<dyn Fn(&WatchEvent) -> Vec<ObjectKey> + Send + Sync>;

/// Feeds watch events into a [`WorkQueue`] and reconciles queued keys with
/// a [`LifecycleManager`].
///
/// Keys are reconciled at most `max-concurrent-reconciles` at a time and
/// never twice concurrently. Retryable failures are re-queued with
/// exponential backoff; other failures wait for the next change.
pub struct Controller<T: Resource, C> {
    manager: Arc<LifecycleManager<T, C>>,
    queue: Arc<WorkQueue>,
    config: ControllerConfig,
    mappers: Vec<EventMapper>,
}

enum Step {
    Shutdown,
    Event(Result<WatchEvent, RecvError>),
    Resync,
    Work(ObjectKey),
    Joined(Result<(), JoinError>),
}

impl<T, C> Controller<T, C>
where
    T: Resource + HasConditions,
    C: ResourceClient,
{
    pub fn new(manager: LifecycleManager<T, C>, config: ControllerConfig) -> Self {
        Self {
            manager: Arc::new(manager),
            queue: Arc::new(WorkQueue::new()),
            config,
            mappers: Vec::new(),
        }
    }

    /// Also reconcile the keys `mapper` returns for each event.
    pub fn watches<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&WatchEvent) -> Vec<ObjectKey> + Send + Sync + 'static,
    {
        self.mappers.push(Arc::new(mapper));
        self
    }

    pub fn queue(&self) -> Arc<WorkQueue> {
        self.queue.clone()
    }

    pub fn kind(&self) -> &'static str {
        T::KIND
    }

    pub fn subroutine_names(&self) -> Vec<&'static str> {
        self.manager.subroutine_names()
    }

    /// Run until `shutdown` is cancelled. Reconciles still in flight are
    /// aborted on exit.
    pub async fn run(self, events: broadcast::Receiver<WatchEvent>, shutdown: CancellationToken) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_reconciles.max(1)));
        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut events = Some(events);
        let mut resync = self.config.resync_interval().map(|period| {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        tracing::info!(
            kind = T::KIND,
            subroutines = ?self.manager.subroutine_names(),
            max_concurrent = self.config.max_concurrent_reconciles,
            "Controller started"
        );
        self.resync().await;

        loop {
            let step = tokio::select! {
                _ = shutdown.cancelled() => Step::Shutdown,
                event = next_event(&mut events) => Step::Event(event),
                _ = tick(&mut resync) => Step::Resync,
                key = self.queue.next() => Step::Work(key),
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => Step::Joined(joined),
            };

            match step {
                Step::Shutdown => break,
                Step::Event(Ok(event)) => self.route(&event),
                Step::Event(Err(RecvError::Lagged(missed))) => {
                    tracing::warn!(kind = T::KIND, missed, "Watch lagged, resyncing");
                    self.resync().await;
                }
                Step::Event(Err(RecvError::Closed)) => {
                    tracing::debug!(kind = T::KIND, "Watch closed");
                    events = None;
                }
                Step::Resync => self.resync().await,
                Step::Work(key) => {
                    let permit = tokio::select! {
                        _ = shutdown.cancelled() => {
                            self.queue.done(&key);
                            break;
                        }
                        permit = semaphore.clone().acquire_owned() => permit,
                    };
                    let Ok(permit) = permit else {
                        self.queue.done(&key);
                        break;
                    };
                    let span = tracing::info_span!("reconcile", kind = T::KIND, key = %key);
                    tasks.spawn(
                        reconcile_one(
                            self.manager.clone(),
                            self.queue.clone(),
                            self.config.clone(),
                            key,
                            permit,
                        )
                        .instrument(span),
                    );
                }
                Step::Joined(Err(err)) if err.is_panic() => {
                    tracing::error!(kind = T::KIND, error = %err, "Reconcile task panicked");
                }
                Step::Joined(_) => {}
            }
        }

        tasks.shutdown().await;
        tracing::info!(kind = T::KIND, "Controller stopped");
    }

    /// Enqueue every object of kind `T`.
    pub async fn resync(&self) {
        match self.manager.client().list::<T>(&ListScope::All).await {
            Ok(objects) => {
                tracing::debug!(kind = T::KIND, count = objects.len(), "Resync");
                for object in objects {
                    self.queue.add(object.key());
                }
            }
            Err(err) => tracing::warn!(kind = T::KIND, error = %err, "Resync list failed"),
        }
    }

    fn route(&self, event: &WatchEvent) {
        if event.is::<T>() {
            self.queue.add(event.key.clone());
        }
        for mapper in &self.mappers {
            for key in mapper(event) {
                self.queue.add(key);
            }
        }
    }
}

async fn reconcile_one<T, C>(
    manager: Arc<LifecycleManager<T, C>>,
    queue: Arc<WorkQueue>,
    config: ControllerConfig,
    key: ObjectKey,
    _permit: OwnedSemaphorePermit,
) where
    T: Resource + HasConditions,
    C: ResourceClient,
{
    match manager.reconcile(&key).await {
        Ok(requeue) => {
            queue.forget(&key);
            if let Some(delay) = requeue {
                tracing::debug!(requeue_after = ?delay, "Reconciled");
                queue.add_after(key.clone(), delay);
            } else {
                tracing::debug!("Reconciled");
            }
        }
        Err(err) if err.is_retryable() => {
            let attempt = queue.record_failure(&key);
            let delay = config.backoff(attempt);
            tracing::error!(error = %err, attempt, retry_after = ?delay, "Reconcile failed");
            queue.add_after(key.clone(), delay);
        }
        Err(err) if err.is_fatal() => {
            queue.forget(&key);
            tracing::error!(error = %err, "Reconcile failed permanently");
        }
        Err(err) => {
            queue.forget(&key);
            tracing::warn!(error = %err, "Reconcile blocked");
        }
    }
    queue.done(&key);
}

async fn next_event(events: &mut Option<broadcast::Receiver<WatchEvent>>) -> Result<WatchEvent, RecvError> {
    match events {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
