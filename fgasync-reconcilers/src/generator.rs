//! Authorization modules generated from bound API resources.
//!
//! For every resource an [`ApiBinding`] brings into an organization, an
//! [`AuthorizationModel`] named `<plural>-<org>` is upserted in the export's
//! workspace. The model extends the namespace (or account) type with
//! `create_/list_/watch_` relations and declares a type for the resource
//! itself. Generated models are shared by every binding of the same export
//! in one organization and deleted when the last of them goes away.

use fgasync_core::client::{optional, ResourceClient};
use fgasync_core::error::{ErrorKind, OperatorError};
use fgasync_core::lifecycle::{BoxFuture, Subroutine, SubroutineResult};
use fgasync_core::lookup::BindingLookup;
use fgasync_core::meta::{ObjectKey, Resource};
use fgasync_core::resources::{
    ApiBinding, ApiExport, ApiResourceSchema, ApiResourceSchemaSpec, AuthorizationModel,
    ExportRef, ResourceScope, StoreRef,
};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt::Write;

pub const GENERATED_MODEL_FINALIZER: &str = "fgasync.io/generated-model";

/// Longest relation name OpenFGA accepts.
pub const MAX_RELATION_LENGTH: usize = 50;

const COLLECTION_VERBS: [&str; 3] = ["create", "list", "watch"];
const OBJECT_VERBS: [&str; 7] = [
    "get",
    "update",
    "delete",
    "patch",
    "watch",
    "statusUpdate",
    "statusPatch",
];

// ── Configuration ──────────────────────────────────────────────────────

fn default_namespace_type() -> String {
    "core_namespace".into()
}

fn default_account_type() -> String {
    "core_platform-mesh_io_account".into()
}

fn default_orgs_root() -> String {
    "root:orgs".into()
}

fn default_skip_exports() -> Vec<String> {
    vec![
        "tenancy.kcp.io".into(),
        "topology.kcp.io".into(),
        "shards.core.kcp.io".into(),
    ]
}

/// Settings for [`ModelGenerator`].
///
/// ```yaml
/// generator:
///   namespace-type: core_namespace
///   account-type: core_platform-mesh_io_account
///   orgs-root: "root:orgs"
///   skip-exports: [tenancy.kcp.io]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GeneratorConfig {
    /// Type extended by namespaced resources.
    #[serde(default = "default_namespace_type")]
    pub namespace_type: String,
    /// Type extended by cluster-scoped resources.
    #[serde(default = "default_account_type")]
    pub account_type: String,
    /// Workspace under which each child workspace is one organization.
    #[serde(default = "default_orgs_root")]
    pub orgs_root: String,
    /// Export names never generated for.
    #[serde(default = "default_skip_exports")]
    pub skip_exports: Vec<String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            namespace_type: default_namespace_type(),
            account_type: default_account_type(),
            orgs_root: default_orgs_root(),
            skip_exports: default_skip_exports(),
        }
    }
}

impl GeneratorConfig {
    pub fn with_orgs_root(mut self, orgs_root: impl Into<String>) -> Self {
        self.orgs_root = orgs_root.into();
        self
    }

    pub fn with_skip_exports(mut self, exports: Vec<String>) -> Self {
        self.skip_exports = exports;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.namespace_type.trim().is_empty() {
            return Err("generator.namespace-type must not be empty".into());
        }
        if self.account_type.trim().is_empty() {
            return Err("generator.account-type must not be empty".into());
        }
        if self.orgs_root.trim().is_empty() || self.orgs_root.ends_with(':') {
            return Err(format!(
                "generator.orgs-root '{}' is not a workspace path",
                self.orgs_root
            ));
        }
        Ok(())
    }

    pub fn skips(&self, export: &ExportRef) -> bool {
        self.skip_exports.iter().any(|name| name == &export.name)
    }

    /// The workspace segment right below `orgs_root`:
    /// `root:orgs:acme:team-a` is organization `acme`.
    pub fn organization_of(&self, workspace_path: &str) -> Result<String, OperatorError> {
        workspace_path
            .strip_prefix(self.orgs_root.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
            .and_then(|rest| rest.split(':').next())
            .filter(|org| !org.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                OperatorError::fatal(format!(
                    "workspace {workspace_path} is not inside organizations root {}",
                    self.orgs_root
                ))
            })
    }
}

// ── Naming ─────────────────────────────────────────────────────────────

/// Names derived from one resource schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNaming {
    /// Dots replaced by underscores, shortened from the left when a
    /// relation name would exceed [`MAX_RELATION_LENGTH`].
    pub group: String,
    pub plural: String,
    pub singular: String,
}

impl ResourceNaming {
    pub fn new(group: &str, plural: &str, singular: &str) -> Result<Self, OperatorError> {
        let group = if group.is_empty() {
            "core".to_string()
        } else {
            group.replace('.', "_")
        };

        // create_<group>_<plural> is the longest generated relation.
        let fixed = "create_".len() + 1 + plural.chars().count();
        let budget = MAX_RELATION_LENGTH.checked_sub(fixed).filter(|b| *b > 0).ok_or_else(|| {
            OperatorError::fatal(format!(
                "resource plural '{plural}' leaves no room for a group within {MAX_RELATION_LENGTH} characters"
            ))
        })?;

        let group = keep_suffix(&group, budget);
        if group.is_empty() {
            return Err(OperatorError::fatal(format!(
                "group of resource '{plural}' is empty after truncation"
            )));
        }

        Ok(Self {
            group,
            plural: plural.to_string(),
            singular: singular.to_string(),
        })
    }

    pub fn from_schema(spec: &ApiResourceSchemaSpec) -> Result<Self, OperatorError> {
        Self::new(&spec.group, &spec.names.plural, &spec.names.singular)
    }

    pub fn relation(&self, verb: &str) -> String {
        format!("{verb}_{}_{}", self.group, self.plural)
    }

    pub fn type_name(&self) -> String {
        format!("{}_{}", self.group, self.singular)
    }
}

fn keep_suffix(value: &str, max_chars: usize) -> String {
    let count = value.chars().count();
    if count <= max_chars {
        return value.to_string();
    }
    let suffix: String = value.chars().skip(count - max_chars).collect();
    suffix.trim_start_matches('_').to_string()
}

/// Name of the generated model for `plural` in `org`.
pub fn generated_model_name(plural: &str, org: &str) -> String {
    format!("{plural}-{org}")
}

/// Render the module text for one resource.
pub fn render_module(
    naming: &ResourceNaming,
    scope: ResourceScope,
    org: &str,
    config: &GeneratorConfig,
) -> String {
    let (parent_type, inherited) = match scope {
        ResourceScope::Namespaced => (&config.namespace_type, "member from parent"),
        ResourceScope::Cluster => (&config.account_type, "member"),
    };

    let mut out = String::new();
    let _ = writeln!(out, "module {}", generated_model_name(&naming.plural, org));
    let _ = write!(out, "\nextend type {parent_type}\n  relations\n");
    for verb in COLLECTION_VERBS {
        let _ = writeln!(out, "    define {}: {inherited}", naming.relation(verb));
    }
    let _ = write!(out, "\ntype {}\n  relations\n", naming.type_name());
    let _ = writeln!(out, "    define parent: [{parent_type}]");
    for verb in OBJECT_VERBS {
        let _ = writeln!(out, "    define {verb}: member from parent");
    }
    out
}

// ── ModelGenerator ─────────────────────────────────────────────────────

pub struct ModelGenerator<C, B> {
    client: C,
    bindings: B,
    config: GeneratorConfig,
}

impl<C: ResourceClient, B: BindingLookup + 'static> ModelGenerator<C, B> {
    pub fn new(client: C, bindings: B, config: GeneratorConfig) -> Self {
        Self {
            client,
            bindings,
            config,
        }
    }

    fn desired_model(
        &self,
        schema: &ApiResourceSchema,
        export_path: &str,
        org: &str,
    ) -> Result<AuthorizationModel, OperatorError> {
        let naming = ResourceNaming::from_schema(&schema.spec)?;
        Ok(AuthorizationModel::new(
            export_path,
            generated_model_name(&naming.plural, org),
            StoreRef::new(org, self.config.orgs_root.clone()),
            render_module(&naming, schema.spec.scope, org, &self.config),
        ))
    }

    /// Create, or update when the module text or store reference differ.
    async fn upsert(&self, desired: AuthorizationModel) -> Result<(), OperatorError> {
        let key = desired.key();
        match optional(self.client.get::<AuthorizationModel>(&key).await)? {
            None => {
                self.client.create(&desired).await?;
                tracing::info!(model = %key, "Created generated authorization model");
            }
            Some(existing) if existing.meta.is_deleting() => {
                return Err(OperatorError::retryable(
                    ErrorKind::Conflict,
                    format!("generated authorization model {key} is still being deleted"),
                ));
            }
            Some(mut existing)
                if existing.spec.model != desired.spec.model
                    || existing.spec.store_ref != desired.spec.store_ref =>
            {
                existing.spec.model = desired.spec.model;
                existing.spec.store_ref = desired.spec.store_ref;
                self.client.update(&existing).await?;
                tracing::info!(model = %key, "Updated generated authorization model");
            }
            Some(_) => {
                tracing::debug!(model = %key, "Generated authorization model up to date");
            }
        }
        Ok(())
    }

    /// Plurals this binding may have generated models for: its bound
    /// resources, plus the export's current schemas while it still exists.
    async fn generated_plurals(&self, binding: &ApiBinding) -> Result<BTreeSet<String>, OperatorError> {
        let mut plurals: BTreeSet<String> = binding
            .status
            .bound_resources
            .iter()
            .map(|r| r.resource.clone())
            .collect();

        let export_key = binding.export().key();
        if let Some(export) = optional(self.client.get::<ApiExport>(&export_key).await)? {
            for name in &export.spec.latest_resource_schemas {
                let key = ObjectKey::new(export.meta.workspace_path.clone(), name.clone());
                if let Some(schema) = optional(self.client.get::<ApiResourceSchema>(&key).await)? {
                    plurals.insert(schema.spec.names.plural);
                }
            }
        }
        Ok(plurals)
    }
}

impl<C: ResourceClient, B: BindingLookup + 'static> Subroutine<ApiBinding> for ModelGenerator<C, B> {
    fn name(&self) -> &'static str {
        "ModelGenerator"
    }

    fn finalizers(&self) -> Vec<String> {
        vec![GENERATED_MODEL_FINALIZER.to_string()]
    }

    fn process<'a>(&'a self, binding: &'a mut ApiBinding) -> BoxFuture<'a, SubroutineResult> {
        Box::pin(async move {
            let export_ref = binding.export().clone();
            if self.config.skips(&export_ref) {
                tracing::debug!(binding = %binding.key(), export = %export_ref.name, "Skipping built-in export");
                return Ok(None);
            }

            let org = self.config.organization_of(&binding.meta.workspace_path)?;
            let export: ApiExport = self.client.get(&export_ref.key()).await?;

            for name in &export.spec.latest_resource_schemas {
                let key = ObjectKey::new(export.meta.workspace_path.clone(), name.clone());
                let schema: ApiResourceSchema = self.client.get(&key).await?;
                let desired = self.desired_model(&schema, &export.meta.workspace_path, &org)?;
                self.upsert(desired).await?;
            }
            Ok(None)
        })
    }

    fn finalize<'a>(&'a self, binding: &'a mut ApiBinding) -> BoxFuture<'a, SubroutineResult> {
        Box::pin(async move {
            let key = binding.key();
            let export_ref = binding.export().clone();
            if self.config.skips(&export_ref) {
                return Ok(None);
            }

            let org = self.config.organization_of(&binding.meta.workspace_path)?;
            // Bindings that are being deleted themselves no longer hold the models.
            let siblings = self.bindings.bindings_for_export(&export_ref).await?;
            let remaining = siblings
                .iter()
                .filter(|b| b.key() != key && !b.meta.is_deleting())
                .filter(|b| {
                    self.config
                        .organization_of(&b.meta.workspace_path)
                        .is_ok_and(|o| o == org)
                })
                .count();
            if remaining > 0 {
                tracing::debug!(
                    binding = %key,
                    org = %org,
                    remaining,
                    "Generated models still referenced"
                );
                return Ok(None);
            }

            for plural in self.generated_plurals(binding).await? {
                let model_key = ObjectKey::new(export_ref.path.clone(), generated_model_name(&plural, &org));
                match self.client.delete::<AuthorizationModel>(&model_key).await {
                    Ok(()) => tracing::info!(model = %model_key, binding = %key, "Deleted generated authorization model"),
                    Err(err) if err.is_not_found() => {
                        tracing::debug!(model = %model_key, "Generated authorization model already gone")
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            Ok(None)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_names_are_kept() {
        let naming = ResourceNaming::new("widgets.example.io", "widgets", "widget").unwrap();
        assert_eq!(naming.relation("create"), "create_widgets_example_io_widgets");
        assert_eq!(naming.type_name(), "widgets_example_io_widget");
    }

    #[test]
    fn test_core_group_for_empty_group() {
        let naming = ResourceNaming::new("", "configmaps", "configmap").unwrap();
        assert_eq!(naming.relation("list"), "list_core_configmaps");
    }

    #[test]
    fn test_long_group_keeps_suffix() {
        let group = "platform-mesh.example.organization.subdomain.io";
        let naming = ResourceNaming::new(group, "widgets", "widget").unwrap();

        assert_eq!(naming.group, "h_example_organization_subdomain_io");
        assert_eq!(
            naming.relation("create"),
            "create_h_example_organization_subdomain_io_widgets"
        );
        assert_eq!(naming.relation("create").len(), MAX_RELATION_LENGTH);
        assert_eq!(ResourceNaming::new(group, "widgets", "widget").unwrap(), naming);
    }

    #[test]
    fn test_truncation_drops_leading_underscore() {
        // budget is 50 - 7 - 1 - 10 = 32
        let group = format!("aaaaaaaaa.{}", "b".repeat(31));
        let naming = ResourceNaming::new(&group, "namespaces", "namespace").unwrap();
        assert_eq!(naming.group, "b".repeat(31));
    }

    #[test]
    fn test_oversized_plural_is_rejected() {
        let plural = "p".repeat(45);
        let err = ResourceNaming::new("g", &plural, "p").unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_render_namespaced_module() {
        let naming = ResourceNaming::new("widgets.example.io", "widgets", "widget").unwrap();
        let text = render_module(&naming, ResourceScope::Namespaced, "acme", &GeneratorConfig::default());
        assert_eq!(
            text,
            "module widgets-acme

extend type core_namespace
  relations
    define create_widgets_example_io_widgets: member from parent
    define list_widgets_example_io_widgets: member from parent
    define watch_widgets_example_io_widgets: member from parent

type widgets_example_io_widget
  relations
    define parent: [core_namespace]
    define get: member from parent
    define update: member from parent
    define delete: member from parent
    define patch: member from parent
    define watch: member from parent
    define statusUpdate: member from parent
    define statusPatch: member from parent
"
        );
    }

    #[test]
    fn test_render_cluster_module_extends_account() {
        let naming = ResourceNaming::new("widgets.example.io", "widgets", "widget").unwrap();
        let text = render_module(&naming, ResourceScope::Cluster, "acme", &GeneratorConfig::default());
        assert!(text.contains("extend type core_platform-mesh_io_account\n"));
        assert!(text.contains("    define create_widgets_example_io_widgets: member\n"));
        assert!(text.contains("    define parent: [core_platform-mesh_io_account]\n"));
    }

    #[test]
    fn test_organization_resolution() {
        let config = GeneratorConfig::default();
        assert_eq!(config.organization_of("root:orgs:acme").unwrap(), "acme");
        assert_eq!(config.organization_of("root:orgs:acme:team-a").unwrap(), "acme");

        for outside in ["root:orgs", "root:orgsx:acme", "root:providers:widgets", "root:orgs:"] {
            assert!(config.organization_of(outside).unwrap_err().is_fatal(), "{outside}");
        }
    }

    #[test]
    fn test_built_in_exports_are_skipped() {
        let config = GeneratorConfig::default();
        assert!(config.skips(&ExportRef::new("tenancy.kcp.io", "root")));
        assert!(!config.skips(&ExportRef::new("widgets.example.io", "root:providers")));
    }

    #[test]
    fn test_config_validation() {
        assert!(GeneratorConfig::default().validate().is_ok());
        assert!(GeneratorConfig::default().with_orgs_root("").validate().is_err());
        assert!(GeneratorConfig::default().with_orgs_root("root:").validate().is_err());
    }
}
