use crate::conditions::{Condition, HasConditions};
use crate::meta::{ObjectKey, ObjectMeta, Resource};
use serde::{Deserialize, Serialize};

/// Reference to a published API export, by name and workspace path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExportRef {
    pub name: String,
    pub path: String,
}

impl ExportRef {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.path.clone(), self.name.clone())
    }
}

// ── ApiBinding ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingReference {
    pub export: ExportRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiBindingSpec {
    pub reference: BindingReference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundResource {
    pub group: String,
    pub resource: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiBindingStatus {
    #[serde(default)]
    pub bound_resources: Vec<BoundResource>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// A tenant workspace's binding to an external API export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiBinding {
    pub meta: ObjectMeta,
    pub spec: ApiBindingSpec,
    #[serde(default)]
    pub status: ApiBindingStatus,
}

impl ApiBinding {
    pub fn new(workspace_path: impl Into<String>, name: impl Into<String>, export: ExportRef) -> Self {
        Self {
            meta: ObjectMeta::new(workspace_path, name),
            spec: ApiBindingSpec {
                reference: BindingReference { export },
            },
            status: ApiBindingStatus::default(),
        }
    }

    pub fn export(&self) -> &ExportRef {
        &self.spec.reference.export
    }
}

impl Resource for ApiBinding {
    const KIND: &'static str = "APIBinding";

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
}

impl HasConditions for ApiBinding {
    fn conditions(&self) -> &[Condition] {
        &self.status.conditions
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status.conditions
    }
}

// ── ApiExport ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiExportSpec {
    /// Names of [`ApiResourceSchema`] objects in the export's workspace.
    #[serde(default)]
    pub latest_resource_schemas: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiExport {
    pub meta: ObjectMeta,
    pub spec: ApiExportSpec,
}

impl ApiExport {
    pub fn new(
        workspace_path: impl Into<String>,
        name: impl Into<String>,
        schemas: Vec<String>,
    ) -> Self {
        Self {
            meta: ObjectMeta::new(workspace_path, name),
            spec: ApiExportSpec {
                latest_resource_schemas: schemas,
            },
        }
    }
}

impl Resource for ApiExport {
    const KIND: &'static str = "APIExport";

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
}

// ── ApiResourceSchema ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceScope {
    Namespaced,
    Cluster,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceNames {
    pub plural: String,
    pub singular: String,
    #[serde(default)]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResourceSchemaSpec {
    pub group: String,
    pub names: ResourceNames,
    pub scope: ResourceScope,
}

/// Introspected definition of one API resource published by an export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResourceSchema {
    pub meta: ObjectMeta,
    pub spec: ApiResourceSchemaSpec,
}

impl ApiResourceSchema {
    pub fn new(
        workspace_path: impl Into<String>,
        name: impl Into<String>,
        group: impl Into<String>,
        plural: impl Into<String>,
        singular: impl Into<String>,
        scope: ResourceScope,
    ) -> Self {
        Self {
            meta: ObjectMeta::new(workspace_path, name),
            spec: ApiResourceSchemaSpec {
                group: group.into(),
                names: ResourceNames {
                    plural: plural.into(),
                    singular: singular.into(),
                    kind: String::new(),
                },
                scope,
            },
        }
    }
}

impl Resource for ApiResourceSchema {
    const KIND: &'static str = "APIResourceSchema";

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
}
