//! Reconcile loop for fgasync.
//!
//! A [`Controller`] watches one resource kind, deduplicates keys in a
//! [`WorkQueue`] and hands each key to a [`LifecycleManager`], which runs the
//! kind's subroutines and maintains finalizers and conditions.
//!
//! ```ignore
//! let manager = LifecycleManager::new(client.clone())
//!     .with_subroutine(StoreSync::new(fga.clone(), lookup.clone()));
//! let controller = Controller::new(manager, ControllerConfig::default());
//! controller.run(client.subscribe(), shutdown).await;
//! ```

pub mod config;
pub mod controller;
pub mod manager;
pub mod queue;

pub use config::ControllerConfig;
pub use controller::{Controller, EventMapper};
pub use manager::LifecycleManager;
pub use queue::WorkQueue;
