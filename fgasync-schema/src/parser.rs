//! Parser for modular FGA DSL files.
//!
//! ```text
//! module widgets
//!
//! extend type core_namespace
//!   relations
//!     define create_widgets: member from parent
//!
//! type widget
//!   relations
//!     define parent: [core_namespace]
//!     define owner: [user, group#member]
//!     define viewer: [user:*] or owner but not blocked
//! ```
//!
//! `or` and `and` cannot be mixed without parentheses; `but not` applies to
//! the whole chain before it.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_while1},
    character::complete::{char, multispace1, space0, space1},
    combinator::{all_consuming, cut, map, opt, value, verify},
    error::{context, convert_error, VerboseError},
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use crate::error::SchemaError;
use crate::types::{ModuleFile, RelationDefinition, SchemaVersion, TypeRestriction, Userset};

type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

/// A module after parsing, before it is merged with its siblings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedModule {
    /// Name from the `module` header, if present.
    pub name: Option<String>,
    pub schema_version: Option<SchemaVersion>,
    pub types: Vec<ParsedType>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedType {
    pub name: String,
    /// `extend type` rather than `type`.
    pub extends: bool,
    pub relations: Vec<RelationDefinition>,
}

// ── Syntax tree ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Restriction {
    restriction: TypeRestriction,
    condition: Option<String>,
}

#[derive(Debug, Clone)]
enum Expr {
    Direct(Vec<Restriction>),
    Computed(String),
    FromParent { computed: String, tupleset: String },
    Union(Vec<Expr>),
    Intersection(Vec<Expr>),
    Exclusion(Box<Expr>, Box<Expr>),
}

struct RawType<'a> {
    name: &'a str,
    extends: bool,
    relations: Vec<(&'a str, Expr)>,
}

struct RawModule<'a> {
    name: Option<&'a str>,
    version: Option<&'a str>,
    types: Vec<RawType<'a>>,
}

// ── Lexical helpers ────────────────────────────────────────────────────

const RESERVED: &[&str] = &[
    "module", "model", "schema", "type", "extend", "relations", "define", "or", "and", "but",
    "not", "from", "with",
];

fn comment(input: &str) -> PResult<'_, ()> {
    value((), pair(char('#'), take_till(|c| c == '\n')))(input)
}

/// Whitespace, newlines and comments.
fn ws(input: &str) -> PResult<'_, ()> {
    value((), many0(alt((value((), multispace1), comment))))(input)
}

fn word(input: &str) -> PResult<'_, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))(input)
}

fn identifier(input: &str) -> PResult<'_, &str> {
    context("identifier", verify(word, |w: &str| !RESERVED.contains(&w)))(input)
}

fn operator<'a>(keyword: &'static str) -> impl FnMut(&'a str) -> PResult<'a, ()> {
    value((), tuple((space1, tag(keyword), space1)))
}

fn but_not(input: &str) -> PResult<'_, ()> {
    value((), tuple((space1, tag("but"), space1, tag("not"), space1)))(input)
}

// ── Expressions ────────────────────────────────────────────────────────

fn restriction(input: &str) -> PResult<'_, Restriction> {
    let (input, type_name) = identifier(input)?;
    let (input, relation) = opt(preceded(char('#'), identifier))(input)?;
    let (input, wildcard) = opt(tag(":*"))(input)?;
    let (input, condition) = opt(preceded(tuple((space1, tag("with"), space1)), word))(input)?;
    Ok((
        input,
        Restriction {
            restriction: TypeRestriction {
                type_name: type_name.to_string(),
                relation: relation.map(str::to_string),
                wildcard: wildcard.is_some(),
            },
            condition: condition.map(str::to_string),
        },
    ))
}

fn direct_list(input: &str) -> PResult<'_, Vec<Restriction>> {
    context(
        "type restrictions",
        delimited(
            pair(char('['), space0),
            separated_list1(tuple((space0, char(','), space0)), restriction),
            pair(space0, char(']')),
        ),
    )(input)
}

fn from_parent(input: &str) -> PResult<'_, Expr> {
    map(
        tuple((identifier, space1, tag("from"), space1, identifier)),
        |(computed, _, _, _, tupleset)| Expr::FromParent {
            computed: computed.to_string(),
            tupleset: tupleset.to_string(),
        },
    )(input)
}

fn operand(input: &str) -> PResult<'_, Expr> {
    alt((
        map(direct_list, Expr::Direct),
        delimited(pair(char('('), space0), expression, pair(space0, char(')'))),
        from_parent,
        map(identifier, |name| Expr::Computed(name.to_string())),
    ))(input)
}

fn expression(input: &str) -> PResult<'_, Expr> {
    let (input, first) = operand(input)?;
    let (input, unions) = many0(preceded(operator("or"), operand))(input)?;
    let (input, intersections) = if unions.is_empty() {
        many0(preceded(operator("and"), operand))(input)?
    } else {
        (input, Vec::new())
    };

    let chain = if !unions.is_empty() {
        Expr::Union(std::iter::once(first).chain(unions).collect())
    } else if !intersections.is_empty() {
        Expr::Intersection(std::iter::once(first).chain(intersections).collect())
    } else {
        first
    };

    let (input, subtract) = opt(preceded(but_not, operand))(input)?;
    let expr = match subtract {
        Some(subtract) => Expr::Exclusion(Box::new(chain), Box::new(subtract)),
        None => chain,
    };
    Ok((input, expr))
}

// ── Declarations ───────────────────────────────────────────────────────

fn relation_definition(input: &str) -> PResult<'_, (&str, Expr)> {
    context(
        "relation definition",
        map(
            tuple((
                tag("define"),
                space1,
                cut(identifier),
                space0,
                cut(char(':')),
                space0,
                cut(expression),
            )),
            |(_, _, name, _, _, _, expr)| (name, expr),
        ),
    )(input)
}

fn type_block(input: &str) -> PResult<'_, RawType<'_>> {
    context(
        "type definition",
        map(
            tuple((
                opt(terminated(tag("extend"), space1)),
                tag("type"),
                space1,
                cut(identifier),
                ws,
                opt(preceded(
                    pair(tag("relations"), ws),
                    many0(terminated(relation_definition, ws)),
                )),
            )),
            |(extend, _, _, name, _, relations)| RawType {
                name,
                extends: extend.is_some(),
                relations: relations.unwrap_or_default(),
            },
        ),
    )(input)
}

fn module_header(input: &str) -> PResult<'_, &str> {
    context(
        "module header",
        preceded(pair(tag("module"), space1), take_while1(|c: char| !c.is_whitespace())),
    )(input)
}

fn model_header(input: &str) -> PResult<'_, &str> {
    context(
        "model header",
        preceded(
            tuple((tag("model"), ws, tag("schema"), space1)),
            take_while1(|c: char| c.is_ascii_digit() || c == '.'),
        ),
    )(input)
}

fn module(input: &str) -> PResult<'_, RawModule<'_>> {
    map(
        tuple((
            ws,
            opt(terminated(module_header, ws)),
            opt(terminated(model_header, ws)),
            many0(terminated(type_block, ws)),
        )),
        |(_, name, version, types)| RawModule {
            name,
            version,
            types,
        },
    )(input)
}

// ── Lowering ───────────────────────────────────────────────────────────

fn lower(expr: Expr, directs: &mut Vec<Vec<Restriction>>) -> Userset {
    match expr {
        Expr::Direct(restrictions) => {
            directs.push(restrictions);
            Userset::This
        }
        Expr::Computed(relation) => Userset::ComputedUserset { relation },
        Expr::FromParent { computed, tupleset } => Userset::TupleToUserset {
            tupleset,
            computed_userset: computed,
        },
        Expr::Union(children) => Userset::Union {
            children: children.into_iter().map(|c| lower(c, directs)).collect(),
        },
        Expr::Intersection(children) => Userset::Intersection {
            children: children.into_iter().map(|c| lower(c, directs)).collect(),
        },
        Expr::Exclusion(base, subtract) => Userset::Exclusion {
            base: Box::new(lower(*base, directs)),
            subtract: Box::new(lower(*subtract, directs)),
        },
    }
}

fn lower_relation(
    module: &str,
    type_name: &str,
    name: &str,
    expr: Expr,
) -> Result<RelationDefinition, SchemaError> {
    let mut directs = Vec::new();
    let rewrite = lower(expr, &mut directs);
    if directs.len() > 1 {
        return Err(SchemaError::InvalidRelation {
            type_name: type_name.to_string(),
            relation: name.to_string(),
            message: "only one direct type restriction list is allowed".to_string(),
        });
    }
    let mut type_restrictions = Vec::new();
    for entry in directs.into_iter().flatten() {
        if entry.condition.is_some() {
            return Err(SchemaError::Unsupported {
                module: module.to_string(),
                feature: "conditions".to_string(),
            });
        }
        type_restrictions.push(entry.restriction);
    }
    Ok(RelationDefinition {
        name: name.to_string(),
        type_restrictions,
        rewrite,
    })
}

/// Parse one module. Errors name `file.name`.
pub fn parse_module(file: &ModuleFile) -> Result<ParsedModule, SchemaError> {
    let raw = match all_consuming(module)(&file.contents) {
        Ok((_, raw)) => raw,
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            return Err(SchemaError::Parse {
                module: file.name.clone(),
                message: convert_error(file.contents.as_str(), e),
            })
        }
        Err(nom::Err::Incomplete(_)) => {
            return Err(SchemaError::Parse {
                module: file.name.clone(),
                message: "incomplete input".to_string(),
            })
        }
    };

    let schema_version = raw.version.map(str::parse::<SchemaVersion>).transpose()?;
    let mut types = Vec::with_capacity(raw.types.len());
    for raw_type in raw.types {
        let relations = raw_type
            .relations
            .into_iter()
            .map(|(name, expr)| lower_relation(&file.name, raw_type.name, name, expr))
            .collect::<Result<Vec<_>, _>>()?;
        types.push(ParsedType {
            name: raw_type.name.to_string(),
            extends: raw_type.extends,
            relations,
        });
    }

    Ok(ParsedModule {
        name: raw.name.map(str::to_string),
        schema_version,
        types,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(dsl: &str) -> Result<ParsedModule, SchemaError> {
        parse_module(&ModuleFile::new("test", dsl))
    }

    #[test]
    fn test_parses_bare_types() {
        let module = parse("module core\ntype user\ntype group").unwrap();
        assert_eq!(module.name.as_deref(), Some("core"));
        assert_eq!(module.types.len(), 2);
        assert_eq!(module.types[0].name, "user");
        assert!(module.types[0].relations.is_empty());
    }

    #[test]
    fn test_parses_model_header() {
        let module = parse("model\n  schema 1.1\n\ntype user\n").unwrap();
        assert!(module.name.is_none());
        assert_eq!(module.schema_version, Some(SchemaVersion::V1_1));
    }

    #[test]
    fn test_rejects_unknown_schema_version() {
        let err = parse("model\n  schema 1.0\ntype user").unwrap_err();
        assert!(matches!(err, SchemaError::UnsupportedVersion(_)));
    }

    #[test]
    fn test_parses_direct_restrictions() {
        let module = parse(
            "type document\n  relations\n    define viewer: [user, group#member, user:*]\n",
        )
        .unwrap();
        let viewer = &module.types[0].relations[0];
        assert_eq!(viewer.rewrite, Userset::This);
        assert_eq!(
            viewer.type_restrictions,
            vec![
                TypeRestriction::direct("user"),
                TypeRestriction::userset("group", "member"),
                TypeRestriction::wildcard("user"),
            ]
        );
    }

    #[test]
    fn test_parses_union_with_tuple_to_userset() {
        let module =
            parse("type folder\n  relations\n    define member: [user] or member from parent\n")
                .unwrap();
        assert_eq!(
            module.types[0].relations[0].rewrite,
            Userset::Union {
                children: vec![Userset::This, Userset::from_parent("member", "parent")],
            }
        );
    }

    #[test]
    fn test_but_not_applies_to_whole_chain() {
        let module =
            parse("type doc\n  relations\n    define viewer: [user] or editor but not blocked\n")
                .unwrap();
        assert_eq!(
            module.types[0].relations[0].rewrite,
            Userset::Exclusion {
                base: Box::new(Userset::Union {
                    children: vec![Userset::This, Userset::computed("editor")],
                }),
                subtract: Box::new(Userset::computed("blocked")),
            }
        );
    }

    #[test]
    fn test_parentheses_group_operators() {
        let module =
            parse("type doc\n  relations\n    define can_edit: (editor or owner) and active\n")
                .unwrap();
        assert_eq!(
            module.types[0].relations[0].rewrite,
            Userset::Intersection {
                children: vec![
                    Userset::Union {
                        children: vec![Userset::computed("editor"), Userset::computed("owner")],
                    },
                    Userset::computed("active"),
                ],
            }
        );
    }

    #[test]
    fn test_mixed_operators_without_parentheses_fail() {
        let err = parse("type doc\n  relations\n    define x: a or b and c\n").unwrap_err();
        assert!(matches!(err, SchemaError::Parse { .. }));
    }

    #[test]
    fn test_extend_type_and_comments() {
        let module = parse(
            "module widgets\n# generated\nextend type core_namespace # tenant namespace\n  relations\n    define create_widgets: member from parent\n",
        )
        .unwrap();
        assert!(module.types[0].extends);
        assert_eq!(module.types[0].name, "core_namespace");
        assert_eq!(module.types[0].relations[0].name, "create_widgets");
    }

    #[test]
    fn test_identifiers_accept_dashes() {
        let module = parse("type core_platform-mesh_io_account").unwrap();
        assert_eq!(module.types[0].name, "core_platform-mesh_io_account");
    }

    #[test]
    fn test_conditions_are_rejected() {
        let err = parse("type doc\n  relations\n    define viewer: [user with ip_check]\n")
            .unwrap_err();
        assert_eq!(
            err,
            SchemaError::Unsupported {
                module: "test".into(),
                feature: "conditions".into(),
            }
        );
    }

    #[test]
    fn test_multiple_direct_lists_are_rejected() {
        let err = parse("type doc\n  relations\n    define viewer: [user] or [group]\n").unwrap_err();
        assert!(matches!(err, SchemaError::InvalidRelation { .. }));
    }

    #[test]
    fn test_parse_error_names_module() {
        let err = parse_module(&ModuleFile::new("root:orgs/acme", "type")).unwrap_err();
        match err {
            SchemaError::Parse { module, .. } => assert_eq!(module, "root:orgs/acme"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
