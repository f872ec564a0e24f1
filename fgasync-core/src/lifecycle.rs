//! Dispatch contract between reconcile subroutines and the lifecycle runtime.
//!
//! A subroutine is one step of an object's reconcile. The runtime calls
//! [`Subroutine::process`] while the object is live and
//! [`Subroutine::finalize`] once deletion was requested, and owns finalizer
//! and condition bookkeeping around both.

use crate::error::OperatorError;
use crate::meta::Resource;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// `Some(delay)` asks the runtime to reconcile the object again after `delay`.
pub type Requeue = Option<Duration>;

pub type SubroutineResult = Result<Requeue, OperatorError>;

pub trait Subroutine<T: Resource>: Send + Sync + 'static {
    /// Stable name, used for the per-subroutine condition type.
    fn name(&self) -> &'static str;

    /// Finalizers this subroutine owns. The runtime adds them before the
    /// first `process` and removes them after a successful `finalize`.
    fn finalizers(&self) -> Vec<String> {
        Vec::new()
    }

    fn process<'a>(&'a self, object: &'a mut T) -> BoxFuture<'a, SubroutineResult>;

    fn finalize<'a>(&'a self, _object: &'a mut T) -> BoxFuture<'a, SubroutineResult> {
        Box::pin(std::future::ready(Ok(None)))
    }

    /// Called before the first `process`, while the object has no conditions yet.
    fn initialize<'a>(&'a self, _object: &'a mut T) -> BoxFuture<'a, SubroutineResult> {
        Box::pin(std::future::ready(Ok(None)))
    }

    /// Called once after every finalizer of the object has been released.
    fn terminate<'a>(&'a self, _object: &'a mut T) -> BoxFuture<'a, SubroutineResult> {
        Box::pin(std::future::ready(Ok(None)))
    }
}
