//! Declarations: reusable, parameterized subgraphs
//!
//! A `declare "name" { ... }` block compiles into a [`Declaration`]: an
//! argument schema built from its `argument` blocks, the labels of its
//! `export` blocks, and the body that is expanded for every instance.

use std::collections::HashSet;

use flow_types::{
    BindError, Block, Body, ConfigError, ConfigErrors, FieldSpec, NodeId, Schema, TypeSpec, Value,
    ValueMap,
};

use crate::eval::evaluate_constant;
use crate::tracker::DependencyTracker;

pub const DECLARE_BLOCK: &str = "declare";
pub const ARGUMENT_BLOCK: &str = "argument";
pub const EXPORT_BLOCK: &str = "export";

/// A compiled `declare` block
#[derive(Debug, Clone)]
pub struct Declaration {
    /// Label of the declare block
    pub name: String,
    /// Import namespace the declaration was loaded under, if any
    pub namespace: Option<String>,
    /// Arguments accepted by instances
    pub arguments: Schema,
    /// Export labels, in declaration order
    pub exports: Vec<String>,
    /// The subgraph expanded for each instance
    pub body: Body,
    /// Revision of the source content this was compiled from
    pub revision: String,
}

impl Declaration {
    /// Compile a `declare` block.
    pub fn compile(
        block: &Block,
        namespace: Option<&str>,
        revision: impl Into<String>,
    ) -> Result<Self, ConfigErrors> {
        let mut errors = ConfigErrors::new();

        let Some(name) = block.label.clone() else {
            return Err(ConfigError::MissingLabel {
                kind: DECLARE_BLOCK.into(),
            }
            .into());
        };
        let qualified = qualify(namespace, &name);

        for attr in &block.body.attributes {
            errors.push(ConfigError::InvalidBlock {
                block: format!("declare.{qualified}"),
                detail: format!("unexpected attribute {:?}", attr.name),
            });
        }

        let mut arguments = Schema::new();
        let mut exports = Vec::new();
        let mut seen = HashSet::new();

        for inner in &block.body.blocks {
            let kind = inner.kind();
            if kind != ARGUMENT_BLOCK && kind != EXPORT_BLOCK {
                continue;
            }
            let Some(label) = inner.label.clone() else {
                errors.push(ConfigError::MissingLabel { kind });
                continue;
            };
            if !seen.insert(inner.id()) {
                errors.push(ConfigError::DuplicateNode { id: inner.id() });
                continue;
            }

            if kind == ARGUMENT_BLOCK {
                match compile_argument(inner, &label) {
                    Ok(field) => arguments = arguments.with_field(field),
                    Err(errs) => errors.extend(errs),
                }
            } else if inner.attribute("value").is_none() {
                errors.push(ConfigError::MissingArgument {
                    node: inner.id(),
                    argument: "value".into(),
                });
            } else {
                exports.push(label);
            }
        }

        errors.into_result(Self {
            name,
            namespace: namespace.map(String::from),
            arguments,
            exports,
            body: block.body.clone(),
            revision: revision.into(),
        })
    }

    /// Name under which the declaration is registered, e.g. `ns.name`
    pub fn qualified_name(&self) -> String {
        qualify(self.namespace.as_deref(), &self.name)
    }

    /// Structural equality, ignoring the source revision
    pub fn same_definition(&self, other: &Declaration) -> bool {
        self.name == other.name
            && self.namespace == other.namespace
            && self.arguments == other.arguments
            && self.exports == other.exports
            && self.body == other.body
    }

    /// Bind call-site arguments for the instance at `node`.
    pub fn bind(&self, node: &NodeId, args: ValueMap) -> Result<Value, ConfigErrors> {
        self.arguments
            .bind(args)
            .map_err(|errs| bind_errors(node, errs))
    }

    /// Block kinds used in the body that may name other declarations
    pub fn used_kinds(&self) -> Vec<String> {
        let mut kinds = Vec::new();
        collect_kinds(&self.body, &mut kinds);
        kinds
    }
}

fn collect_kinds(body: &Body, out: &mut Vec<String>) {
    for block in &body.blocks {
        let kind = block.kind();
        match kind.as_str() {
            DECLARE_BLOCK => collect_kinds(&block.body, out),
            ARGUMENT_BLOCK | EXPORT_BLOCK => {}
            _ if kind.starts_with("import.") => {}
            _ => {
                if !out.contains(&kind) {
                    out.push(kind);
                }
            }
        }
    }
}

fn compile_argument(block: &Block, label: &str) -> Result<FieldSpec, ConfigErrors> {
    let mut errors = ConfigErrors::new();
    let mut optional = false;
    let mut default = None;
    let mut comment = String::new();

    for attr in &block.body.attributes {
        let value = match evaluate_constant(&attr.value) {
            Ok(v) => v,
            Err(e) => {
                errors.push(ConfigError::TypeMismatch {
                    node: block.id(),
                    argument: attr.name.clone(),
                    detail: e.to_string(),
                });
                continue;
            }
        };
        match attr.name.as_str() {
            "optional" => match value.as_bool() {
                Some(b) => optional = b,
                None => errors.push(ConfigError::TypeMismatch {
                    node: block.id(),
                    argument: attr.name.clone(),
                    detail: format!("expected bool, found {}", value.describe()),
                }),
            },
            "default" => default = Some(value),
            "comment" => match value.as_str() {
                Some(s) => comment = s.to_string(),
                None => errors.push(ConfigError::TypeMismatch {
                    node: block.id(),
                    argument: attr.name.clone(),
                    detail: format!("expected string, found {}", value.describe()),
                }),
            },
            other => errors.push(ConfigError::UnknownArgument {
                node: block.id(),
                argument: other.to_string(),
            }),
        }
    }

    let mut field = FieldSpec::new(label, comment, TypeSpec::Any);
    if optional {
        field = field.optional();
    }
    if let Some(default) = default {
        field = field.with_default(default);
    }
    errors.into_result(field)
}

/// Map schema binding problems onto configuration errors for `node`.
pub fn bind_errors(node: &NodeId, errors: Vec<BindError>) -> ConfigErrors {
    errors
        .into_iter()
        .map(|e| match e {
            BindError::Missing(argument) => ConfigError::MissingArgument {
                node: node.clone(),
                argument,
            },
            BindError::Unknown(argument) => ConfigError::UnknownArgument {
                node: node.clone(),
                argument,
            },
            BindError::Invalid { field, source } => ConfigError::TypeMismatch {
                node: node.clone(),
                argument: field,
                detail: source.to_string(),
            },
        })
        .collect()
}

pub(crate) fn qualify(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{ns}.{name}"),
        _ => name.to_string(),
    }
}

/// Reject declarations that instantiate each other in a loop.
///
/// A kind used inside a declaration refers to `namespace.kind` when that
/// exists in the set, otherwise to `kind` itself.
pub fn check_declaration_cycles<'a, I>(declarations: I) -> ConfigErrors
where
    I: IntoIterator<Item = &'a Declaration>,
{
    let declarations: Vec<&Declaration> = declarations.into_iter().collect();
    let names: HashSet<String> = declarations.iter().map(|d| d.qualified_name()).collect();

    let mut graph = DependencyTracker::new();
    for decl in &declarations {
        graph.add_node(NodeId::new(decl.qualified_name()));
    }
    for decl in &declarations {
        let from = NodeId::new(decl.qualified_name());
        for kind in decl.used_kinds() {
            let scoped = qualify(decl.namespace.as_deref(), &kind);
            let target = if names.contains(&scoped) {
                scoped
            } else if names.contains(&kind) {
                kind
            } else {
                continue;
            };
            graph.add_edge(from.clone(), NodeId::new(target));
        }
    }

    graph
        .find_cycles()
        .into_iter()
        .map(|members| ConfigError::DeclarationCycle {
            members: members.into_iter().map(|id| id.0).collect(),
        })
        .collect()
}
