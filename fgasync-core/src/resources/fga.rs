use crate::conditions::{Condition, HasConditions};
use crate::meta::{ObjectKey, ObjectMeta, Resource};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A relationship fact `(object, relation, user)`.
///
/// Equality is exact field match; no normalization is applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tuple {
    pub object: String,
    pub relation: String,
    pub user: String,
}

impl Tuple {
    pub fn new(
        object: impl Into<String>,
        relation: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            object: object.into(),
            relation: relation.into(),
            user: user.into(),
        }
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.object, self.relation, self.user)
    }
}

/// Reference from an [`AuthorizationModel`] to the [`Store`] it contributes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreRef {
    pub name: String,
    /// Workspace path of the referenced store.
    pub path: String,
}

impl StoreRef {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.path.clone(), self.name.clone())
    }

    /// Whether this reference points at the given store.
    pub fn targets(&self, store: &Store) -> bool {
        self.name == store.meta.name && self.path == store.meta.workspace_path
    }
}

// ── Store ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSpec {
    /// Core schema module in FGA DSL.
    #[serde(default)]
    pub core_module: String,
    #[serde(default)]
    pub tuples: Vec<Tuple>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStatus {
    #[serde(default)]
    pub store_id: String,
    #[serde(default)]
    pub authorization_model_id: String,
    #[serde(default)]
    pub managed_tuples: Vec<Tuple>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// A tenant's remote FGA store plus its core schema module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Store {
    pub meta: ObjectMeta,
    pub spec: StoreSpec,
    #[serde(default)]
    pub status: StoreStatus,
}

impl Store {
    pub fn new(
        workspace_path: impl Into<String>,
        name: impl Into<String>,
        core_module: impl Into<String>,
    ) -> Self {
        Self {
            meta: ObjectMeta::new(workspace_path, name),
            spec: StoreSpec {
                core_module: core_module.into(),
                tuples: Vec::new(),
            },
            status: StoreStatus::default(),
        }
    }

    pub fn with_tuples(mut self, tuples: Vec<Tuple>) -> Self {
        self.spec.tuples = tuples;
        self
    }

    /// The reference an [`AuthorizationModel`] uses to point at this store.
    pub fn store_ref(&self) -> StoreRef {
        StoreRef::new(self.meta.name.clone(), self.meta.workspace_path.clone())
    }
}

impl Resource for Store {
    const KIND: &'static str = "Store";

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
}

impl HasConditions for Store {
    fn conditions(&self) -> &[Condition] {
        &self.status.conditions
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status.conditions
    }
}

// ── AuthorizationModel ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationModelSpec {
    pub store_ref: StoreRef,
    /// Extension module in FGA DSL.
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub tuples: Vec<Tuple>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationModelStatus {
    #[serde(default)]
    pub managed_tuples: Vec<Tuple>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// One tenant's contribution to a store's composed schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationModel {
    pub meta: ObjectMeta,
    pub spec: AuthorizationModelSpec,
    #[serde(default)]
    pub status: AuthorizationModelStatus,
}

impl AuthorizationModel {
    pub fn new(
        workspace_path: impl Into<String>,
        name: impl Into<String>,
        store_ref: StoreRef,
        model: impl Into<String>,
    ) -> Self {
        Self {
            meta: ObjectMeta::new(workspace_path, name),
            spec: AuthorizationModelSpec {
                store_ref,
                model: model.into(),
                tuples: Vec::new(),
            },
            status: AuthorizationModelStatus::default(),
        }
    }

    pub fn with_tuples(mut self, tuples: Vec<Tuple>) -> Self {
        self.spec.tuples = tuples;
        self
    }
}

impl Resource for AuthorizationModel {
    const KIND: &'static str = "AuthorizationModel";

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
}

impl HasConditions for AuthorizationModel {
    fn conditions(&self) -> &[Condition] {
        &self.status.conditions
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status.conditions
    }
}
