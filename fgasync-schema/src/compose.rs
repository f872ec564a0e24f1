//! Merge named modules into one authorization model.

use std::collections::HashMap;

use crate::error::SchemaError;
use crate::parser::{parse_module, ParsedType};
use crate::types::{
    AuthorizationModel, ModuleFile, RelationDefinition, SchemaVersion, TypeDefinition, Userset,
};

/// Compile `modules` into a single model.
///
/// Every `type` must be defined exactly once across all modules; `extend type`
/// may add relations to a type defined by any module, regardless of order.
/// Errors name the offending module by its [`ModuleFile::name`].
pub fn compile_modules(
    modules: &[ModuleFile],
    version: SchemaVersion,
) -> Result<AuthorizationModel, SchemaError> {
    let parsed = modules
        .iter()
        .map(|file| parse_module(file).map(|module| (file.name.as_str(), module)))
        .collect::<Result<Vec<_>, _>>()?;

    let mut types: Vec<TypeDefinition> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut extensions: Vec<(&str, ParsedType)> = Vec::new();

    for (module, parsed_module) in parsed {
        for parsed_type in parsed_module.types {
            if parsed_type.extends {
                extensions.push((module, parsed_type));
                continue;
            }
            if index.contains_key(&parsed_type.name) {
                return Err(SchemaError::DuplicateType {
                    type_name: parsed_type.name,
                    module: module.to_string(),
                });
            }
            let mut definition = TypeDefinition::new(parsed_type.name.clone());
            add_relations(&mut definition, parsed_type.relations, module)?;
            index.insert(parsed_type.name, types.len());
            types.push(definition);
        }
    }

    for (module, extension) in extensions {
        let Some(&position) = index.get(&extension.name) else {
            return Err(SchemaError::UnknownExtendedType {
                type_name: extension.name,
                module: module.to_string(),
            });
        };
        add_relations(&mut types[position], extension.relations, module)?;
    }

    let model = AuthorizationModel {
        schema_version: version,
        type_definitions: types,
    };
    validate_references(&model)?;

    tracing::debug!(
        modules = modules.len(),
        types = model.type_definitions.len(),
        "Compiled authorization model"
    );
    Ok(model)
}

fn add_relations(
    definition: &mut TypeDefinition,
    relations: Vec<RelationDefinition>,
    module: &str,
) -> Result<(), SchemaError> {
    for relation in relations {
        if definition.has_relation(&relation.name) {
            return Err(SchemaError::DuplicateRelation {
                type_name: definition.name.clone(),
                relation: relation.name,
                module: module.to_string(),
            });
        }
        definition.relations.push(relation);
    }
    Ok(())
}

/// Every referenced type and relation must exist in the merged model.
fn validate_references(model: &AuthorizationModel) -> Result<(), SchemaError> {
    for definition in &model.type_definitions {
        for relation in &definition.relations {
            let unknown_relation = |referenced: String| SchemaError::UnknownRelation {
                type_name: definition.name.clone(),
                relation: relation.name.clone(),
                referenced,
            };

            for restriction in &relation.type_restrictions {
                let Some(target) = model.type_definition(&restriction.type_name) else {
                    return Err(SchemaError::UnknownType {
                        type_name: definition.name.clone(),
                        relation: relation.name.clone(),
                        referenced: restriction.type_name.clone(),
                    });
                };
                if let Some(target_relation) = &restriction.relation {
                    if !target.has_relation(target_relation) {
                        return Err(unknown_relation(restriction.to_string()));
                    }
                }
            }

            let mut error = None;
            relation.rewrite.for_each_leaf(&mut |leaf| {
                if error.is_some() {
                    return;
                }
                error = check_leaf(model, definition, leaf).map(&unknown_relation);
            });
            if let Some(err) = error {
                return Err(err);
            }
        }
    }
    Ok(())
}

/// Returns the name of the missing relation, if any.
fn check_leaf(model: &AuthorizationModel, definition: &TypeDefinition, leaf: &Userset) -> Option<String> {
    match leaf {
        Userset::ComputedUserset { relation } if !definition.has_relation(relation) => {
            Some(relation.clone())
        }
        Userset::TupleToUserset {
            tupleset,
            computed_userset,
        } => {
            let Some(tupleset_relation) = definition.relation(tupleset) else {
                return Some(tupleset.clone());
            };
            let restrictions = &tupleset_relation.type_restrictions;
            let reachable = restrictions.is_empty()
                || restrictions.iter().any(|r| {
                    model
                        .type_definition(&r.type_name)
                        .is_some_and(|t| t.has_relation(computed_userset))
                });
            (!reachable).then(|| format!("{computed_userset} from {tupleset}"))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CORE: &str = "module core
type user
type account
  relations
    define member: [user]
type namespace
  relations
    define parent: [account]
    define member: [user] or member from parent
";

    fn compile(modules: &[(&str, &str)]) -> Result<AuthorizationModel, SchemaError> {
        let files: Vec<ModuleFile> = modules
            .iter()
            .map(|(name, dsl)| ModuleFile::new(*name, *dsl))
            .collect();
        compile_modules(&files, SchemaVersion::V1_1)
    }

    #[test]
    fn test_single_module() {
        let model = compile(&[("store", "module core\ntype user")]).unwrap();
        assert_eq!(model.schema_version, SchemaVersion::V1_1);
        assert_eq!(model.type_names().collect::<Vec<_>>(), vec!["user"]);
    }

    #[test]
    fn test_extension_adds_relations() {
        let model = compile(&[
            ("store", CORE),
            (
                "root:orgs:acme/widgets",
                "module widgets\nextend type namespace\n  relations\n    define create_widgets: member from parent\ntype widget\n  relations\n    define parent: [namespace]\n    define get: member from parent\n",
            ),
        ])
        .unwrap();
        let namespace = model.type_definition("namespace").unwrap();
        assert!(namespace.has_relation("create_widgets"));
        assert!(model.type_definition("widget").unwrap().has_relation("get"));
    }

    #[test]
    fn test_extension_before_definition_is_fine() {
        let model = compile(&[
            ("a", "extend type user\n  relations\n    define self: [user]\n"),
            ("b", "type user"),
        ])
        .unwrap();
        assert!(model.type_definition("user").unwrap().has_relation("self"));
    }

    #[test]
    fn test_duplicate_type_is_rejected() {
        let err = compile(&[("store", "type user"), ("ext", "type user")]).unwrap_err();
        assert_eq!(
            err,
            SchemaError::DuplicateType {
                type_name: "user".into(),
                module: "ext".into(),
            }
        );
    }

    #[test]
    fn test_duplicate_relation_via_extension_is_rejected() {
        let err = compile(&[
            ("store", CORE),
            ("ext", "extend type account\n  relations\n    define member: [user]\n"),
        ])
        .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateRelation { ref relation, .. } if relation == "member"));
    }

    #[test]
    fn test_extending_unknown_type_is_rejected() {
        let err = compile(&[("ext", "extend type ghost\n  relations\n    define x: [ghost]\n")])
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownExtendedType { .. }));
    }

    #[test]
    fn test_unknown_restriction_type_is_rejected() {
        let err = compile(&[("store", "type doc\n  relations\n    define viewer: [user]\n")])
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownType { ref referenced, .. } if referenced == "user"));
    }

    #[test]
    fn test_unknown_computed_relation_is_rejected() {
        let err = compile(&[("store", "type user\ntype doc\n  relations\n    define viewer: [user] or editor\n")])
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownRelation { ref referenced, .. } if referenced == "editor"));
    }

    #[test]
    fn test_tuple_to_userset_must_reach_relation() {
        let err = compile(&[
            ("store", CORE),
            ("ext", "type widget\n  relations\n    define parent: [namespace]\n    define get: admin from parent\n"),
        ])
        .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownRelation { ref referenced, .. } if referenced == "admin from parent"));
    }
}
