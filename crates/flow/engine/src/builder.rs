//! Graph builder: configuration tree to validated dependency graph
//!
//! Building never touches live state. It classifies every block, checks the
//! structure of the configuration and returns either a [`Graph`] ready to be
//! committed by the controller or every [`ConfigError`] it found.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use flow_types::{Block, Body, ConfigError, ConfigErrors, Expr, FieldSpec, NodeId, Schema, TypeSpec};

use crate::component::Registration;
use crate::component_registry::ComponentRegistry;
use crate::declaration::{
    check_declaration_cycles, qualify, Declaration, ARGUMENT_BLOCK, DECLARE_BLOCK, EXPORT_BLOCK,
};
use crate::eval::{coerce, evaluate_constant};
use crate::import::{import_exports, import_schema, ImportTree};
use crate::module_registry::ModuleRegistry;
use crate::tracker::DependencyTracker;

/// What a node is
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// A registered component kind
    Component(Arc<Registration>),
    /// Call site of a declaration; `declaration` is `None` when the
    /// declaration comes from an import whose content is not known yet
    Module {
        name: String,
        declaration: Option<Arc<Declaration>>,
    },
    /// `import.file` / `import.string`
    Import { kind: String, namespace: String },
    /// `argument` inside a module body
    Argument,
    /// `export` inside a module body
    Export,
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Component(_) => "component",
            Self::Module { .. } => "module",
            Self::Import { .. } => "import",
            Self::Argument => "argument",
            Self::Export => "export",
        }
    }

    /// Argument schema, when known statically
    fn arguments(&self) -> Option<Schema> {
        match self {
            Self::Component(reg) => Some(reg.arguments.clone()),
            Self::Module {
                declaration: Some(decl),
                ..
            } => Some(decl.arguments.clone()),
            Self::Import { kind, .. } => import_schema(kind),
            _ => None,
        }
    }

    /// Export schema; `None` means the node cannot be referenced
    fn exports(&self) -> Option<Schema> {
        match self {
            Self::Component(reg) => Some(reg.exports.clone()),
            Self::Module {
                declaration: Some(decl),
                ..
            } => Some(decl.exports.iter().fold(Schema::new(), |schema, name| {
                schema.with_field(FieldSpec::new(name.as_str(), "", TypeSpec::Any))
            })),
            Self::Module { declaration: None, .. } => Some(Schema::open()),
            Self::Import { .. } => Some(import_exports()),
            Self::Argument => Some(
                Schema::new().with_field(FieldSpec::new("value", "Bound argument", TypeSpec::Any)),
            ),
            Self::Export => None,
        }
    }
}

/// One node of a built graph
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub id: NodeId,
    pub kind: NodeKind,
    pub block: Block,
}

/// A validated configuration
#[derive(Debug, Clone, Default)]
pub struct Graph {
    /// Nodes in declaration order
    pub nodes: Vec<NodeSpec>,
    /// Declarations defined by `declare` blocks in this body
    pub declarations: Vec<Declaration>,
    pub tracker: DependencyTracker,
}

impl Graph {
    pub fn node(&self, id: &NodeId) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| &n.id == id)
    }
}

pub struct GraphBuilder<'a> {
    components: &'a ComponentRegistry,
    modules: &'a ModuleRegistry,
    namespace: Option<&'a str>,
    module_scope: bool,
    staged: Option<&'a HashMap<NodeId, ImportTree>>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(components: &'a ComponentRegistry, modules: &'a ModuleRegistry) -> Self {
        Self {
            components,
            modules,
            namespace: None,
            module_scope: false,
            staged: None,
        }
    }

    /// Namespace used to resolve declaration names used in the body.
    pub fn with_namespace(mut self, namespace: Option<&'a str>) -> Self {
        self.namespace = namespace;
        self
    }

    /// Allow `argument` and `export` blocks (module bodies).
    pub fn module_scope(mut self, enabled: bool) -> Self {
        self.module_scope = enabled;
        self
    }

    /// Imports already fetched for this body, keyed by import node id.
    pub fn with_staged_imports(mut self, staged: &'a HashMap<NodeId, ImportTree>) -> Self {
        self.staged = Some(staged);
        self
    }

    pub fn build(&self, body: &Body) -> Result<Graph, ConfigErrors> {
        let mut errors = ConfigErrors::new();

        for attr in &body.attributes {
            errors.push(ConfigError::InvalidBlock {
                block: attr.name.clone(),
                detail: "attributes are not allowed at the top level of a configuration".into(),
            });
        }

        let declarations = self.compile_declarations(body, &mut errors);

        // Import labels whose content is not staged: call sites under them
        // are resolved when the import runs.
        let deferred: HashSet<&str> = body
            .blocks
            .iter()
            .filter(|b| import_schema(&b.kind()).is_some())
            .filter_map(|b| b.label.as_deref().map(|label| (b.id(), label)))
            .filter(|(id, _)| !self.staged.is_some_and(|s| s.contains_key(id)))
            .map(|(_, label)| label)
            .collect();

        let mut nodes: Vec<NodeSpec> = Vec::new();
        let mut ids: HashSet<NodeId> = HashSet::new();

        for block in &body.blocks {
            let kind = block.kind();
            if kind == DECLARE_BLOCK {
                continue;
            }
            if block.label.is_none() {
                errors.push(ConfigError::MissingLabel { kind });
                continue;
            }
            let id = block.id();
            if !ids.insert(id.clone()) {
                errors.push(ConfigError::DuplicateNode { id });
                continue;
            }

            match self.classify(block, &kind, &declarations, &deferred) {
                Ok(node_kind) => nodes.push(NodeSpec {
                    id,
                    kind: node_kind,
                    block: block.clone(),
                }),
                Err(e) => errors.push(e),
            }
        }

        for node in &nodes {
            self.check_arguments(node, &mut errors);
        }

        let tracker = self.wire(&nodes, &mut errors);

        for members in tracker.find_cycles() {
            errors.push(ConfigError::DependencyCycle { members });
        }

        errors.into_result(Graph {
            nodes,
            declarations,
            tracker,
        })
    }

    fn compile_declarations(&self, body: &Body, errors: &mut ConfigErrors) -> Vec<Declaration> {
        let mut declarations: Vec<Declaration> = Vec::new();
        for block in body.blocks.iter().filter(|b| b.kind() == DECLARE_BLOCK) {
            match Declaration::compile(block, self.namespace, "local") {
                Ok(decl) => {
                    if declarations.iter().any(|d| d.name == decl.name) {
                        errors.push(ConfigError::DuplicateDeclaration {
                            name: decl.qualified_name(),
                        });
                    } else {
                        declarations.push(decl);
                    }
                }
                Err(errs) => errors.extend(errs),
            }
        }
        errors.extend(check_declaration_cycles(&declarations));
        declarations
    }

    fn classify(
        &self,
        block: &Block,
        kind: &str,
        declarations: &[Declaration],
        deferred: &HashSet<&str>,
    ) -> Result<NodeKind, ConfigError> {
        match kind {
            ARGUMENT_BLOCK | EXPORT_BLOCK if !self.module_scope => {
                return Err(ConfigError::InvalidBlock {
                    block: block.id().0,
                    detail: format!("{kind} blocks are only valid inside declare"),
                });
            }
            ARGUMENT_BLOCK => return Ok(NodeKind::Argument),
            EXPORT_BLOCK => return Ok(NodeKind::Export),
            _ => {}
        }

        if import_schema(kind).is_some() {
            let namespace = block.label.clone().unwrap_or_default();
            return Ok(NodeKind::Import {
                kind: kind.to_string(),
                namespace,
            });
        }

        if let Some(registration) = self.components.get(kind) {
            return Ok(NodeKind::Component(registration));
        }

        if let Some(decl) = self.resolve_declaration(kind, declarations) {
            return Ok(NodeKind::Module {
                name: decl.qualified_name(),
                declaration: Some(decl),
            });
        }

        let under_deferred = kind
            .split_once('.')
            .is_some_and(|(prefix, _)| deferred.contains(prefix));
        if under_deferred {
            return Ok(NodeKind::Module {
                name: kind.to_string(),
                declaration: None,
            });
        }

        Err(ConfigError::UnknownComponent {
            kind: kind.to_string(),
        })
    }

    fn resolve_declaration(&self, kind: &str, local: &[Declaration]) -> Option<Arc<Declaration>> {
        let scoped = qualify(self.namespace, kind);
        if let Some(decl) = local
            .iter()
            .find(|d| d.qualified_name() == scoped || d.qualified_name() == kind)
        {
            return Some(Arc::new(decl.clone()));
        }

        if let Some(staged) = self.staged {
            if let Some(decl) = staged.values().find_map(|tree| tree.find(kind)) {
                return Some(Arc::new(decl.clone()));
            }
        }

        self.modules.resolve(kind, self.namespace)
    }

    fn check_arguments(&self, node: &NodeSpec, errors: &mut ConfigErrors) {
        let Some(schema) = node.kind.arguments() else {
            return;
        };

        let supplied = node.block.argument_exprs();
        for (name, expr) in &supplied {
            let Some(field) = schema.field(name) else {
                if !schema.is_open() {
                    errors.push(ConfigError::UnknownArgument {
                        node: node.id.clone(),
                        argument: name.clone(),
                    });
                }
                continue;
            };
            if !expr.is_constant() {
                continue;
            }
            let checked = evaluate_constant(expr).and_then(|v| coerce(v, &field.ty));
            if let Err(e) = checked {
                errors.push(ConfigError::TypeMismatch {
                    node: node.id.clone(),
                    argument: name.clone(),
                    detail: e.to_string(),
                });
            }
        }

        for field in schema.required_fields() {
            if !supplied.iter().any(|(name, _)| name == &field.name) {
                errors.push(ConfigError::MissingArgument {
                    node: node.id.clone(),
                    argument: field.name.clone(),
                });
            }
        }
    }

    /// Resolve every reference into an edge.
    fn wire(&self, nodes: &[NodeSpec], errors: &mut ConfigErrors) -> DependencyTracker {
        let mut tracker = DependencyTracker::new();
        let by_id: HashMap<&NodeId, &NodeSpec> = nodes.iter().map(|n| (&n.id, n)).collect();

        for node in nodes {
            tracker.add_node(node.id.clone());
        }

        for node in nodes {
            let consumer_schema = node.kind.arguments();

            for (argument, expr) in node.block.argument_exprs() {
                for path in expr.references() {
                    let Some((producer, consumed)) = longest_prefix(path, &by_id) else {
                        errors.push(ConfigError::UnresolvedReference {
                            node: node.id.clone(),
                            reference: path.join("."),
                        });
                        continue;
                    };

                    let Some(exports) = producer.kind.exports() else {
                        errors.push(ConfigError::UnresolvedReference {
                            node: node.id.clone(),
                            reference: path.join("."),
                        });
                        continue;
                    };

                    if let Some(field) = path.get(consumed) {
                        if !exports.contains(field) {
                            errors.push(ConfigError::UnresolvedReference {
                                node: node.id.clone(),
                                reference: path.join("."),
                            });
                            continue;
                        }

                        let direct = matches!(&expr, Expr::Reference(p) if p.len() == consumed + 1);
                        let consumer_ty = consumer_schema
                            .as_ref()
                            .and_then(|s| s.field(&argument))
                            .map(|f| &f.ty);
                        let producer_ty = exports.field(field).map(|f| &f.ty);
                        if let (true, Some(consumer_ty), Some(producer_ty)) =
                            (direct, consumer_ty, producer_ty)
                        {
                            if !producer_ty.is_compatible_with(consumer_ty) {
                                errors.push(ConfigError::TypeMismatch {
                                    node: node.id.clone(),
                                    argument: argument.clone(),
                                    detail: format!(
                                        "{} exports {field} as {producer_ty}, expected {consumer_ty}",
                                        producer.id
                                    ),
                                });
                            }
                        }
                    }

                    tracker.add_edge(producer.id.clone(), node.id.clone());
                }
            }
        }

        // Call sites depend on the import that provides their declaration.
        for import in nodes {
            let NodeKind::Import { namespace, .. } = &import.kind else {
                continue;
            };
            let prefix = format!("{namespace}.");
            for call_site in nodes {
                if let NodeKind::Module { .. } = call_site.kind {
                    if call_site.block.kind().starts_with(&prefix) {
                        tracker.add_edge(import.id.clone(), call_site.id.clone());
                    }
                }
            }
        }

        tracker
    }
}

/// Longest prefix of `path` naming a node, with the number of segments used.
pub(crate) fn longest_prefix<'n>(
    path: &[String],
    nodes: &HashMap<&NodeId, &'n NodeSpec>,
) -> Option<(&'n NodeSpec, usize)> {
    (1..=path.len()).rev().find_map(|n| {
        let id = NodeId::from_path(&path[..n]);
        nodes.get(&id).map(|node| (*node, n))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testcomponents;

    fn components() -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        testcomponents::register_all(&mut registry).unwrap();
        registry
    }

    fn build(src: &str) -> Result<Graph, ConfigErrors> {
        let components = components();
        let modules = ModuleRegistry::new();
        let body = flow_dsl::parse(src).unwrap();
        GraphBuilder::new(&components, &modules).build(&body)
    }

    fn ids(nodes: &[NodeId]) -> Vec<&str> {
        nodes.iter().map(NodeId::as_str).collect()
    }

    const PIPELINE: &str = r#"
        testcomponents.summation "sum" {
            input = testcomponents.passthrough.pt.output
        }
        testcomponents.passthrough "pt" {
            input = testcomponents.count.inc.count
        }
        testcomponents.count "inc" {
            frequency = "10ms"
            max = 10
        }
    "#;

    #[test]
    fn test_build_pipeline() {
        let graph = build(PIPELINE).unwrap();
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(
            ids(&graph.tracker.full_order()),
            vec![
                "testcomponents.count.inc",
                "testcomponents.passthrough.pt",
                "testcomponents.summation.sum"
            ]
        );
        assert_eq!(
            ids(&graph.tracker.dependencies(&NodeId::new("testcomponents.summation.sum"))),
            vec!["testcomponents.passthrough.pt"]
        );
    }

    #[test]
    fn test_cycle_is_rejected() {
        let errors = build(
            r#"
            testcomponents.passthrough "a" { input = testcomponents.passthrough.b.output }
            testcomponents.passthrough "b" { input = testcomponents.passthrough.a.output }
            "#,
        )
        .unwrap_err();

        let cycles: Vec<&ConfigError> = errors
            .iter()
            .filter(|e| matches!(e, ConfigError::DependencyCycle { .. }))
            .collect();
        assert_eq!(cycles.len(), 1);
        assert_eq!(
            cycles[0],
            &ConfigError::DependencyCycle {
                members: vec![
                    NodeId::new("testcomponents.passthrough.a"),
                    NodeId::new("testcomponents.passthrough.b"),
                ]
            }
        );
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let errors = build(
            r#"testcomponents.passthrough "a" { input = testcomponents.passthrough.a.output }"#,
        )
        .unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::DependencyCycle { members } if members.len() == 1)));
    }

    #[test]
    fn test_every_error_is_reported() {
        let errors = build(
            r#"
            testcomponents.count "inc" {
                frequency = "soon"
                colour = "red"
            }
            testcomponents.count "inc" { frequency = "1s" max = 1 }
            nosuch.component "x" { }
            testcomponents.summation { input = 1 }
            testcomponents.summation "sum" { input = testcomponents.count.missing.count }
            testcomponents.passthrough "pt" { input = testcomponents.count.inc.nope }
            "#,
        )
        .unwrap_err();

        let has = |pred: &dyn Fn(&ConfigError) -> bool| errors.iter().any(pred);
        assert!(has(&|e| matches!(e, ConfigError::TypeMismatch { argument, .. } if argument == "frequency")));
        assert!(has(&|e| matches!(e, ConfigError::UnknownArgument { argument, .. } if argument == "colour")));
        assert!(has(&|e| matches!(e, ConfigError::MissingArgument { argument, .. } if argument == "max")));
        assert!(has(&|e| matches!(e, ConfigError::DuplicateNode { .. })));
        assert!(has(&|e| matches!(e, ConfigError::UnknownComponent { kind } if kind == "nosuch.component")));
        assert!(has(&|e| matches!(e, ConfigError::MissingLabel { .. })));
        assert!(has(&|e| matches!(
            e,
            ConfigError::UnresolvedReference { reference, .. } if reference == "testcomponents.count.missing.count"
        )));
        assert!(has(&|e| matches!(
            e,
            ConfigError::UnresolvedReference { reference, .. } if reference == "testcomponents.count.inc.nope"
        )));
        assert_eq!(errors.len(), 8);
    }

    #[test]
    fn test_wiring_type_mismatch() {
        let errors = build(
            r#"
            import.string "lib" { content = "" }
            testcomponents.summation "s" { input = import.string.lib.namespace }
            "#,
        )
        .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors.iter().next(),
            Some(ConfigError::TypeMismatch { argument, .. }) if argument == "input"
        ));

        let graph = build(
            r#"
            testcomponents.passthrough "pt" { input = "text" }
            testcomponents.count "inc" {
                frequency = "1s"
                max = testcomponents.summation.s.sum
            }
            testcomponents.summation "s" { input = 1 }
            testcomponents.summation "t" { input = testcomponents.passthrough.pt.output }
            "#,
        );
        assert!(graph.is_ok(), "int and any-typed exports are compatible");
    }

    #[test]
    fn test_local_declaration_call_site() {
        let graph = build(
            r#"
            declare "double" {
                argument "x" { }
                export "out" { value = argument.x.value * 2 }
            }
            double "d" { x = 21 }
            testcomponents.summation "sum" { input = double.d.out }
            "#,
        )
        .unwrap();

        assert_eq!(graph.declarations.len(), 1);
        let call_site = graph.node(&NodeId::new("double.d")).unwrap();
        assert!(matches!(&call_site.kind, NodeKind::Module { name, declaration: Some(_) } if name == "double"));
        assert_eq!(
            ids(&graph.tracker.dependents(&NodeId::new("double.d"))),
            vec!["testcomponents.summation.sum"]
        );
    }

    #[test]
    fn test_call_site_arguments_checked() {
        let errors = build(
            r#"
            declare "double" {
                argument "x" { }
                export "out" { value = argument.x.value * 2 }
            }
            double "d" { y = 21 }
            testcomponents.summation "sum" { input = double.d.missing }
            "#,
        )
        .unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_argument_blocks_need_module_scope() {
        let errors = build(r#"argument "x" { }"#).unwrap_err();
        assert!(matches!(errors.iter().next(), Some(ConfigError::InvalidBlock { .. })));

        let components = components();
        let modules = ModuleRegistry::new();
        let body = flow_dsl::parse(
            r#"
            argument "x" { }
            export "y" { value = argument.x.value }
            "#,
        )
        .unwrap();
        let graph = GraphBuilder::new(&components, &modules)
            .module_scope(true)
            .build(&body)
            .unwrap();
        assert_eq!(
            ids(&graph.tracker.dependents(&NodeId::new("argument.x"))),
            vec!["export.y"]
        );
    }

    #[test]
    fn test_exports_are_not_referenceable() {
        let components = components();
        let modules = ModuleRegistry::new();
        let body = flow_dsl::parse(
            r#"
            export "y" { value = 1 }
            testcomponents.summation "s" { input = export.y.value }
            "#,
        )
        .unwrap();
        let errors = GraphBuilder::new(&components, &modules)
            .module_scope(true)
            .build(&body)
            .unwrap_err();
        assert!(matches!(
            errors.iter().next(),
            Some(ConfigError::UnresolvedReference { .. })
        ));
    }

    #[test]
    fn test_call_sites_under_unstaged_import_are_deferred() {
        let graph = build(
            r#"
            testcomponents.passthrough "src" { input = "" }
            import.string "lib" { content = testcomponents.passthrough.src.output }
            lib.test "m" { anything = 1 }
            testcomponents.summation "sum" { input = lib.test.m.output }
            "#,
        )
        .unwrap();

        let call_site = graph.node(&NodeId::new("lib.test.m")).unwrap();
        assert!(matches!(call_site.kind, NodeKind::Module { declaration: None, .. }));
        assert_eq!(
            ids(&graph.tracker.dependencies(&NodeId::new("lib.test.m"))),
            vec!["import.string.lib"]
        );
    }

    #[tokio::test]
    async fn test_staged_import_resolves_call_sites() {
        let components = components();
        let modules = ModuleRegistry::new();
        let body = flow_dsl::parse(
            r#"
            import.string "lib" { content = "unused" }
            lib.test "m" { input = 1 }
            "#,
        )
        .unwrap();

        let source = Arc::new(crate::import::StringSource::new(
            r#"declare "test" { argument "input" { } export "output" { value = argument.input.value } }"#,
        ));
        let tree = ImportTree::resolve(source, "lib".into(), Vec::new()).await.unwrap();
        let staged = HashMap::from([(NodeId::new("import.string.lib"), tree)]);

        let graph = GraphBuilder::new(&components, &modules)
            .with_staged_imports(&staged)
            .build(&body)
            .unwrap();
        let call_site = graph.node(&NodeId::new("lib.test.m")).unwrap();
        assert!(matches!(&call_site.kind, NodeKind::Module { name, declaration: Some(_) } if name == "lib.test"));

        let bad = flow_dsl::parse(
            r#"
            import.string "lib" { content = "unused" }
            lib.test "m" { }
            "#,
        )
        .unwrap();
        let errors = GraphBuilder::new(&components, &modules)
            .with_staged_imports(&staged)
            .build(&bad)
            .unwrap_err();
        assert!(matches!(
            errors.iter().next(),
            Some(ConfigError::MissingArgument { argument, .. }) if argument == "input"
        ));
    }
}
