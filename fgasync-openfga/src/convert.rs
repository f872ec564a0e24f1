//! Mapping between compiled schema types and OpenFGA protobuf messages.

use crate::error::FgaError;
use fgasync_core::resources::Tuple;
use fgasync_schema::{
    AuthorizationModel, RelationDefinition, SchemaVersion, TypeDefinition, TypeRestriction,
    Userset,
};
use openfga_rs as proto;
use proto::relation_reference::RelationOrWildcard;
use std::collections::HashMap;

/// prost boxes recursive fields; this accepts either shape.
fn unbox<T>(value: impl Into<Box<T>>) -> T {
    *value.into()
}

fn object_relation(relation: &str) -> proto::ObjectRelation {
    proto::ObjectRelation {
        object: String::new(),
        relation: relation.to_string(),
    }
}

// ── Outgoing ───────────────────────────────────────────────────────────

pub fn to_proto_type_definitions(model: &AuthorizationModel) -> Vec<proto::TypeDefinition> {
    model.type_definitions.iter().map(to_proto_type).collect()
}

fn to_proto_type(definition: &TypeDefinition) -> proto::TypeDefinition {
    let relations: HashMap<String, proto::Userset> = definition
        .relations
        .iter()
        .map(|r| (r.name.clone(), to_proto_userset(&r.rewrite)))
        .collect();

    let metadata = (!definition.relations.is_empty()).then(|| proto::Metadata {
        relations: definition
            .relations
            .iter()
            .map(|r| (r.name.clone(), to_proto_relation_metadata(r)))
            .collect(),
        ..Default::default()
    });

    proto::TypeDefinition {
        r#type: definition.name.clone(),
        relations,
        metadata,
    }
}

fn to_proto_relation_metadata(relation: &RelationDefinition) -> proto::RelationMetadata {
    proto::RelationMetadata {
        directly_related_user_types: relation
            .type_restrictions
            .iter()
            .map(|r| proto::RelationReference {
                r#type: r.type_name.clone(),
                relation_or_wildcard: if r.wildcard {
                    Some(RelationOrWildcard::Wildcard(proto::Wildcard {}))
                } else {
                    r.relation.clone().map(RelationOrWildcard::Relation)
                },
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

fn to_proto_userset(userset: &Userset) -> proto::Userset {
    use proto::userset::Userset as Kind;

    let kind = match userset {
        Userset::This => Kind::This(proto::DirectUserset {}),
        Userset::ComputedUserset { relation } => Kind::ComputedUserset(object_relation(relation)),
        Userset::TupleToUserset {
            tupleset,
            computed_userset,
        } => Kind::TupleToUserset(proto::TupleToUserset {
            tupleset: Some(object_relation(tupleset)),
            computed_userset: Some(object_relation(computed_userset)),
        }),
        Userset::Union { children } => Kind::Union(proto::Usersets {
            child: children.iter().map(to_proto_userset).collect(),
        }),
        Userset::Intersection { children } => Kind::Intersection(proto::Usersets {
            child: children.iter().map(to_proto_userset).collect(),
        }),
        Userset::Exclusion { base, subtract } => Kind::Difference(
            proto::Difference {
                base: Some(to_proto_userset(base).into()),
                subtract: Some(to_proto_userset(subtract).into()),
            }
            .into(),
        ),
    };
    proto::Userset {
        userset: Some(kind),
    }
}

pub fn to_tuple_key(tuple: &Tuple) -> proto::TupleKey {
    proto::TupleKey {
        user: tuple.user.clone(),
        relation: tuple.relation.clone(),
        object: tuple.object.clone(),
        condition: None,
    }
}

pub fn to_tuple_key_without_condition(tuple: &Tuple) -> proto::TupleKeyWithoutCondition {
    proto::TupleKeyWithoutCondition {
        user: tuple.user.clone(),
        relation: tuple.relation.clone(),
        object: tuple.object.clone(),
    }
}

// ── Incoming ───────────────────────────────────────────────────────────

pub fn from_proto_model(model: proto::AuthorizationModel) -> Result<AuthorizationModel, FgaError> {
    let schema_version = model
        .schema_version
        .parse::<SchemaVersion>()
        .map_err(|e| FgaError::Conversion(e.to_string()))?;
    let type_definitions = model
        .type_definitions
        .into_iter()
        .map(from_proto_type)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(AuthorizationModel {
        schema_version,
        type_definitions,
    })
}

fn from_proto_type(definition: proto::TypeDefinition) -> Result<TypeDefinition, FgaError> {
    let mut metadata = definition
        .metadata
        .map(|m| m.relations)
        .unwrap_or_default();

    let mut relations = definition
        .relations
        .into_iter()
        .map(|(name, userset)| {
            let restrictions = metadata
                .remove(&name)
                .map(|m| m.directly_related_user_types)
                .unwrap_or_default()
                .into_iter()
                .map(from_proto_reference)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(RelationDefinition {
                rewrite: from_proto_userset(userset, &definition.r#type, &name)?,
                name,
                type_restrictions: restrictions,
            })
        })
        .collect::<Result<Vec<_>, FgaError>>()?;
    relations.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(TypeDefinition {
        name: definition.r#type,
        relations,
    })
}

fn from_proto_reference(reference: proto::RelationReference) -> Result<TypeRestriction, FgaError> {
    if !reference.condition.is_empty() {
        return Err(FgaError::Conversion(format!(
            "type restriction '{}' carries condition '{}'",
            reference.r#type, reference.condition
        )));
    }
    Ok(match reference.relation_or_wildcard {
        Some(RelationOrWildcard::Wildcard(_)) => TypeRestriction::wildcard(reference.r#type),
        Some(RelationOrWildcard::Relation(relation)) => {
            TypeRestriction::userset(reference.r#type, relation)
        }
        None => TypeRestriction::direct(reference.r#type),
    })
}

fn from_proto_userset(userset: proto::Userset, type_name: &str, relation: &str) -> Result<Userset, FgaError> {
    use proto::userset::Userset as Kind;

    let missing = || FgaError::Conversion(format!("{type_name}#{relation}: incomplete userset"));
    let children = |usersets: proto::Usersets| {
        usersets
            .child
            .into_iter()
            .map(|c| from_proto_userset(c, type_name, relation))
            .collect::<Result<Vec<_>, _>>()
    };

    match userset.userset.ok_or_else(missing)? {
        Kind::This(_) => Ok(Userset::This),
        Kind::ComputedUserset(computed) => Ok(Userset::ComputedUserset {
            relation: computed.relation,
        }),
        Kind::TupleToUserset(ttu) => Ok(Userset::TupleToUserset {
            tupleset: ttu.tupleset.ok_or_else(missing)?.relation,
            computed_userset: ttu.computed_userset.ok_or_else(missing)?.relation,
        }),
        Kind::Union(usersets) => Ok(Userset::Union {
            children: children(usersets)?,
        }),
        Kind::Intersection(usersets) => Ok(Userset::Intersection {
            children: children(usersets)?,
        }),
        Kind::Difference(difference) => {
            let difference: proto::Difference = unbox(difference);
            let base: proto::Userset = unbox(difference.base.ok_or_else(missing)?);
            let subtract: proto::Userset = unbox(difference.subtract.ok_or_else(missing)?);
            Ok(Userset::Exclusion {
                base: Box::new(from_proto_userset(base, type_name, relation)?),
                subtract: Box::new(from_proto_userset(subtract, type_name, relation)?),
            })
        }
    }
}
