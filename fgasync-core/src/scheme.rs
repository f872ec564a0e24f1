//! Explicit registry of the resource kinds a client may serve.
//!
//! Built once during startup and handed to the resource client by value.

use crate::meta::Resource;
use crate::resources::{ApiBinding, ApiExport, ApiResourceSchema, AuthorizationModel, Store};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub struct Scheme {
    kinds: BTreeSet<&'static str>,
}

impl Scheme {
    /// An empty scheme; register kinds with [`register`](Self::register).
    pub fn new() -> Self {
        Self::default()
    }

    /// All kinds fgasync reconciles or reads.
    pub fn with_defaults() -> Self {
        Self::new()
            .register::<Store>()
            .register::<AuthorizationModel>()
            .register::<ApiBinding>()
            .register::<ApiExport>()
            .register::<ApiResourceSchema>()
    }

    pub fn register<R: Resource>(mut self) -> Self {
        self.kinds.insert(R::KIND);
        self
    }

    pub fn contains<R: Resource>(&self) -> bool {
        self.contains_kind(R::KIND)
    }

    pub fn contains_kind(&self, kind: &str) -> bool {
        self.kinds.contains(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.kinds.iter().copied()
    }
}
