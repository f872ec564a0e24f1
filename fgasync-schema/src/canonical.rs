//! Canonical DSL rendering.
//!
//! Types, relations and type restrictions are sorted; operand order inside
//! `or`/`and` chains is kept as written. Two models render identically iff
//! they are structurally equal up to that ordering, which makes the text
//! usable for change detection.

use crate::types::{AuthorizationModel, RelationDefinition, TypeRestriction, Userset};
use std::fmt::Write;

pub fn to_canonical_text(model: &AuthorizationModel) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "model\n  schema {}", model.schema_version);

    let mut types: Vec<_> = model.type_definitions.iter().collect();
    types.sort_by(|a, b| a.name.cmp(&b.name));

    for definition in types {
        let _ = write!(out, "\ntype {}\n", definition.name);
        if definition.relations.is_empty() {
            continue;
        }
        out.push_str("  relations\n");
        let mut relations: Vec<_> = definition.relations.iter().collect();
        relations.sort_by(|a, b| a.name.cmp(&b.name));
        for relation in relations {
            let _ = writeln!(out, "    define {}: {}", relation.name, render_relation(relation));
        }
    }
    out
}

/// Whether two models have the same canonical form.
pub fn equivalent(a: &AuthorizationModel, b: &AuthorizationModel) -> bool {
    to_canonical_text(a) == to_canonical_text(b)
}

fn render_relation(relation: &RelationDefinition) -> String {
    let mut restrictions: Vec<&TypeRestriction> = relation.type_restrictions.iter().collect();
    restrictions.sort();
    restrictions.dedup();
    let direct = format!(
        "[{}]",
        restrictions
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    render(&relation.rewrite, &direct)
}

fn render(userset: &Userset, direct: &str) -> String {
    match userset {
        Userset::This => direct.to_string(),
        Userset::ComputedUserset { relation } => relation.clone(),
        Userset::TupleToUserset {
            tupleset,
            computed_userset,
        } => format!("{computed_userset} from {tupleset}"),
        Userset::Union { children } => join(children, " or ", direct),
        Userset::Intersection { children } => join(children, " and ", direct),
        Userset::Exclusion { base, subtract } => {
            let base = match base.as_ref() {
                Userset::Exclusion { .. } => format!("({})", render(base, direct)),
                other => render(other, direct),
            };
            format!("{base} but not {}", operand(subtract, direct))
        }
    }
}

fn join(children: &[Userset], separator: &str, direct: &str) -> String {
    children
        .iter()
        .map(|child| operand(child, direct))
        .collect::<Vec<_>>()
        .join(separator)
}

fn operand(userset: &Userset, direct: &str) -> String {
    if userset.is_leaf() {
        render(userset, direct)
    } else {
        format!("({})", render(userset, direct))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::compile_modules;
    use crate::types::{ModuleFile, SchemaVersion};

    fn compile(dsl: &str) -> AuthorizationModel {
        compile_modules(&[ModuleFile::new("test", dsl)], SchemaVersion::V1_1).unwrap()
    }

    #[test]
    fn test_renders_core_module() {
        let text = to_canonical_text(&compile("module core\ntype user"));
        assert_eq!(text, "model\n  schema 1.1\n\ntype user\n");
    }

    #[test]
    fn test_order_of_types_and_relations_is_irrelevant() {
        let a = compile(
            "type user\ntype doc\n  relations\n    define owner: [user]\n    define viewer: [user, user:*] or owner\n",
        );
        let b = compile(
            "type doc\n  relations\n    define viewer: [user:*, user] or owner\n    define owner: [user]\ntype user\n",
        );
        assert!(equivalent(&a, &b));
    }

    #[test]
    fn test_different_rewrites_differ() {
        let a = compile("type user\ntype doc\n  relations\n    define owner: [user]\n    define viewer: owner\n");
        let b = compile("type user\ntype doc\n  relations\n    define owner: [user]\n    define viewer: [user] or owner\n");
        assert!(!equivalent(&a, &b));
    }

    #[test]
    fn test_canonical_text_reparses_to_same_model() {
        let dsl = "type user
type doc
  relations
    define blocked: [user]
    define editor: [user]
    define owner: [user]
    define viewer: ([user] or editor) and owner but not blocked
";
        let model = compile(dsl);
        let text = to_canonical_text(&model);
        assert!(text.contains("define viewer: ([user] or editor) and owner but not blocked"));
        assert_eq!(to_canonical_text(&compile(&text)), text);
    }
}
