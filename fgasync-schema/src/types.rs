//! Compiled authorization model.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SchemaError;

/// Schema language version of a compiled model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchemaVersion {
    #[default]
    #[serde(rename = "1.1")]
    V1_1,
}

impl SchemaVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaVersion::V1_1 => "1.1",
        }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaVersion {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1.1" => Ok(SchemaVersion::V1_1),
            other => Err(SchemaError::UnsupportedVersion(other.to_string())),
        }
    }
}

/// One named schema fragment in DSL form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleFile {
    pub name: String,
    pub contents: String,
}

impl ModuleFile {
    pub fn new(name: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contents: contents.into(),
        }
    }
}

/// A complete authorization model: every type with all of its relations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationModel {
    pub schema_version: SchemaVersion,
    pub type_definitions: Vec<TypeDefinition>,
}

impl AuthorizationModel {
    pub fn type_definition(&self, name: &str) -> Option<&TypeDefinition> {
        self.type_definitions.iter().find(|t| t.name == name)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.type_definitions.iter().map(|t| t.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDefinition {
    pub name: String,
    #[serde(default)]
    pub relations: Vec<RelationDefinition>,
}

impl TypeDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            relations: Vec::new(),
        }
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDefinition> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn has_relation(&self, name: &str) -> bool {
        self.relation(name).is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDefinition {
    pub name: String,
    /// Types that may be assigned directly; only meaningful when the rewrite
    /// contains [`Userset::This`].
    #[serde(default)]
    pub type_restrictions: Vec<TypeRestriction>,
    pub rewrite: Userset,
}

/// An entry of a direct-assignment list: `user`, `group#member` or `user:*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeRestriction {
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    #[serde(default)]
    pub wildcard: bool,
}

impl TypeRestriction {
    pub fn direct(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            relation: None,
            wildcard: false,
        }
    }

    pub fn userset(type_name: impl Into<String>, relation: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            relation: Some(relation.into()),
            wildcard: false,
        }
    }

    pub fn wildcard(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            relation: None,
            wildcard: true,
        }
    }
}

impl fmt::Display for TypeRestriction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.relation, self.wildcard) {
            (_, true) => write!(f, "{}:*", self.type_name),
            (Some(relation), false) => write!(f, "{}#{}", self.type_name, relation),
            (None, false) => f.write_str(&self.type_name),
        }
    }
}

/// Relation rewrite expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Userset {
    /// Directly assigned users.
    This,
    /// Users of another relation on the same object.
    ComputedUserset { relation: String },
    /// `computed_userset from tupleset`.
    TupleToUserset {
        tupleset: String,
        computed_userset: String,
    },
    Union { children: Vec<Userset> },
    Intersection { children: Vec<Userset> },
    Exclusion {
        base: Box<Userset>,
        subtract: Box<Userset>,
    },
}

impl Userset {
    pub fn computed(relation: impl Into<String>) -> Self {
        Userset::ComputedUserset {
            relation: relation.into(),
        }
    }

    pub fn from_parent(computed_userset: impl Into<String>, tupleset: impl Into<String>) -> Self {
        Userset::TupleToUserset {
            tupleset: tupleset.into(),
            computed_userset: computed_userset.into(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(
            self,
            Userset::This | Userset::ComputedUserset { .. } | Userset::TupleToUserset { .. }
        )
    }

    /// Whether [`Userset::This`] appears anywhere in the expression.
    pub fn contains_this(&self) -> bool {
        match self {
            Userset::This => true,
            Userset::ComputedUserset { .. } | Userset::TupleToUserset { .. } => false,
            Userset::Union { children } | Userset::Intersection { children } => {
                children.iter().any(Userset::contains_this)
            }
            Userset::Exclusion { base, subtract } => base.contains_this() || subtract.contains_this(),
        }
    }

    /// Visit every leaf of the expression.
    pub fn for_each_leaf<'a>(&'a self, f: &mut impl FnMut(&'a Userset)) {
        match self {
            Userset::Union { children } | Userset::Intersection { children } => {
                for child in children {
                    child.for_each_leaf(f);
                }
            }
            Userset::Exclusion { base, subtract } => {
                base.for_each_leaf(f);
                subtract.for_each_leaf(f);
            }
            leaf => f(leaf),
        }
    }
}
