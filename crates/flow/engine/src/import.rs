//! Import sources and the import node
//!
//! `import.file` and `import.string` blocks load declarations from content
//! outside the configuration. Content is fetched from an [`ImportSource`],
//! parsed, and compiled into an [`ImportTree`]: the declarations of the
//! source plus the trees of any imports nested inside it. The tree is then
//! installed into the scope's [`ModuleRegistry`] under the import's label.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use flow_types::{ConfigError, ConfigErrors, FieldSpec, Schema, TypeSpec, Value, ValueMap};

use crate::component::{Component, ExportSink};
use crate::declaration::{bind_errors, check_declaration_cycles, Declaration, DECLARE_BLOCK};
use crate::error::{ComponentError, ImportError};
use crate::eval::evaluate_constant;
use crate::health::{FailureKind, Health};
use crate::module_registry::ModuleRegistry;
use crate::update_queue::{update_queue, UpdateReceiver, UpdateSender};

pub const IMPORT_FILE: &str = "import.file";
pub const IMPORT_STRING: &str = "import.string";

/// Content fetched from a source, tagged with its revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceContent {
    pub text: String,
    pub revision: String,
}

impl SourceContent {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let revision = revision_of(&text);
        Self { text, revision }
    }
}

/// BLAKE3 digest of the content, hex encoded.
pub fn revision_of(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// Provider of declaration-bearing content.
#[async_trait]
pub trait ImportSource: Send + Sync {
    /// Stable identity, used for cycle detection and logging.
    fn identity(&self) -> String;

    /// Fetch the current content.
    async fn fetch(&self) -> Result<SourceContent, ImportError>;

    /// Whether the import node should poll this source for changes.
    fn polled(&self) -> bool {
        false
    }

    /// Resolve a path named by a nested `import.file` in this source's content.
    fn resolve_path(&self, path: &str) -> PathBuf {
        PathBuf::from(path)
    }
}

/// A file on the local filesystem, polled for changes.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ImportSource for FileSource {
    fn identity(&self) -> String {
        format!("file:{}", self.path.display())
    }

    async fn fetch(&self) -> Result<SourceContent, ImportError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| ImportError::Io {
                path: self.path.display().to_string(),
                source,
            })?;
        Ok(SourceContent::new(text))
    }

    fn polled(&self) -> bool {
        true
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let candidate = PathBuf::from(path);
        if candidate.is_absolute() {
            return candidate;
        }
        match self.path.parent() {
            Some(dir) => dir.join(candidate),
            None => candidate,
        }
    }
}

/// Content given inline; new content arrives through updates.
#[derive(Debug, Clone)]
pub struct StringSource {
    content: SourceContent,
}

impl StringSource {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            content: SourceContent::new(text),
        }
    }
}

#[async_trait]
impl ImportSource for StringSource {
    fn identity(&self) -> String {
        format!("string:{}", &self.content.revision[..16])
    }

    async fn fetch(&self) -> Result<SourceContent, ImportError> {
        Ok(self.content.clone())
    }
}

/// Argument schema of an import block kind.
pub fn import_schema(kind: &str) -> Option<Schema> {
    match kind {
        IMPORT_FILE => Some(
            Schema::new()
                .with_field(FieldSpec::new("filename", "Path of the file to import", TypeSpec::String))
                .with_field(
                    FieldSpec::new("poll_frequency", "How often to check the file", TypeSpec::Duration)
                        .optional(),
                ),
        ),
        IMPORT_STRING => Some(Schema::new().with_field(FieldSpec::new(
            "content",
            "Configuration text holding declare blocks",
            TypeSpec::String,
        ))),
        _ => None,
    }
}

/// Export schema shared by both import kinds.
pub fn import_exports() -> Schema {
    Schema::new()
        .with_field(FieldSpec::new("namespace", "Import label", TypeSpec::String))
        .with_field(FieldSpec::new("revision", "Content revision", TypeSpec::String))
        .with_field(FieldSpec::new(
            "declarations",
            "Qualified names of the loaded declarations",
            TypeSpec::Array(Box::new(TypeSpec::String)),
        ))
}

/// Where an import block reads from, derived from its bound arguments.
#[derive(Clone)]
pub struct ImportSettings {
    pub source: Arc<dyn ImportSource>,
    pub poll_frequency: Option<Duration>,
}

impl ImportSettings {
    /// Build settings from bound arguments.
    ///
    /// Relative file names are resolved through `parent` when the import is
    /// nested inside another source's content.
    pub fn from_args(
        kind: &str,
        args: &Value,
        parent: Option<&dyn ImportSource>,
    ) -> Result<Self, ComponentError> {
        match kind {
            IMPORT_FILE => {
                let filename = args
                    .get("filename")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ComponentError::invalid("filename must be a string"))?;
                let path = match parent {
                    Some(parent) => parent.resolve_path(filename),
                    None => PathBuf::from(filename),
                };
                Ok(Self {
                    source: Arc::new(FileSource::new(path)),
                    poll_frequency: args.get("poll_frequency").and_then(Value::as_duration),
                })
            }
            IMPORT_STRING => {
                let content = args
                    .get("content")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ComponentError::invalid("content must be a string"))?;
                Ok(Self {
                    source: Arc::new(StringSource::new(content)),
                    poll_frequency: None,
                })
            }
            other => Err(ComponentError::invalid(format!("{other:?} is not an import kind"))),
        }
    }
}

/// Compiled content of one source and everything it imports.
#[derive(Debug, Clone)]
pub struct ImportTree {
    /// Namespace the declarations are registered under, e.g. `lib.inner`
    pub namespace: String,
    pub identity: String,
    pub revision: String,
    pub declarations: Vec<Declaration>,
    pub children: Vec<ImportTree>,
}

impl ImportTree {
    /// Fetch and compile `source` and, recursively, its nested imports.
    ///
    /// `ancestry` holds the identities of the sources that led here.
    pub fn resolve(
        source: Arc<dyn ImportSource>,
        namespace: String,
        ancestry: Vec<String>,
    ) -> BoxFuture<'static, Result<ImportTree, ImportError>> {
        async move {
            let identity = source.identity();
            if ancestry.contains(&identity) {
                let mut chain = ancestry;
                chain.push(identity);
                return Err(ConfigErrors::from(ConfigError::ImportCycle { chain }).into());
            }

            let content = source.fetch().await?;
            let body = flow_dsl::parse(&content.text).map_err(|source| ImportError::Parse {
                identity: identity.clone(),
                source,
            })?;

            let mut errors = ConfigErrors::new();
            let mut declarations: Vec<Declaration> = Vec::new();
            let mut children = Vec::new();
            let mut chain = ancestry;
            chain.push(identity.clone());

            for attr in &body.attributes {
                errors.push(ConfigError::InvalidBlock {
                    block: namespace.clone(),
                    detail: format!("unexpected attribute {:?} in imported content", attr.name),
                });
            }

            for block in &body.blocks {
                let kind = block.kind();
                if kind == DECLARE_BLOCK {
                    match Declaration::compile(block, Some(&namespace), content.revision.clone()) {
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
                } else if let Some(schema) = import_schema(&kind) {
                    let Some(label) = block.label.clone() else {
                        errors.push(ConfigError::MissingLabel { kind });
                        continue;
                    };
                    let child_namespace = format!("{namespace}.{label}");

                    let args = match constant_args(block, &schema) {
                        Ok(args) => args,
                        Err(errs) => {
                            errors.extend(errs);
                            continue;
                        }
                    };
                    let settings = match ImportSettings::from_args(&kind, &args, Some(&*source)) {
                        Ok(settings) => settings,
                        Err(e) => {
                            errors.push(ConfigError::Import {
                                namespace: child_namespace,
                                detail: e.to_string(),
                            });
                            continue;
                        }
                    };

                    match ImportTree::resolve(settings.source, child_namespace.clone(), chain.clone())
                        .await
                    {
                        Ok(child) => children.push(child),
                        Err(ImportError::Config(errs)) => errors.extend(errs),
                        Err(e) => errors.push(ConfigError::Import {
                            namespace: child_namespace,
                            detail: e.to_string(),
                        }),
                    }
                } else {
                    errors.push(ConfigError::InvalidBlock {
                        block: block.id().0,
                        detail: "imported content may only contain declare and import blocks"
                            .into(),
                    });
                }
            }

            let tree = ImportTree {
                namespace,
                identity,
                revision: content.revision,
                declarations,
                children,
            };
            errors.extend(check_declaration_cycles(tree.all_declarations()));
            errors.into_result(tree).map_err(ImportError::from)
        }
        .boxed()
    }

    /// Every declaration in this tree, parents before children.
    pub fn all_declarations(&self) -> Vec<&Declaration> {
        let mut out: Vec<&Declaration> = self.declarations.iter().collect();
        for child in &self.children {
            out.extend(child.all_declarations());
        }
        out
    }

    /// Find a declaration by qualified name.
    pub fn find(&self, qualified: &str) -> Option<&Declaration> {
        self.all_declarations()
            .into_iter()
            .find(|d| d.qualified_name() == qualified)
    }

    /// Digest over the revisions of the whole tree.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        self.hash_into(&mut hasher);
        hasher.finalize().to_hex().to_string()
    }

    fn hash_into(&self, hasher: &mut blake3::Hasher) {
        hasher.update(self.namespace.as_bytes());
        hasher.update(self.revision.as_bytes());
        for child in &self.children {
            child.hash_into(hasher);
        }
    }
}

/// Bind the attributes of a nested import block, which must be constant.
fn constant_args(block: &flow_types::Block, schema: &Schema) -> Result<Value, ConfigErrors> {
    let mut errors = ConfigErrors::new();
    let mut args = ValueMap::new();
    for attr in &block.body.attributes {
        match evaluate_constant(&attr.value) {
            Ok(v) => {
                args.insert(attr.name.clone(), v);
            }
            Err(e) => errors.push(ConfigError::TypeMismatch {
                node: block.id(),
                argument: attr.name.clone(),
                detail: format!("nested import arguments must be constant: {e}"),
            }),
        }
    }
    if !errors.is_empty() {
        return Err(errors);
    }
    schema.bind(args).map_err(|errs| bind_errors(&block.id(), errs))
}

// ── Import node ─────────────────────────────────────────────────────────────

struct ImportState {
    settings: ImportSettings,
    fingerprint: Option<String>,
    installed: Vec<String>,
    error: Option<String>,
}

/// Live `import.*` node: keeps its namespace in the registry current.
pub struct ImportNode {
    kind: String,
    namespace: String,
    registry: Arc<ModuleRegistry>,
    exports: ExportSink,
    default_poll: Duration,
    updates_tx: UpdateSender<ImportSettings>,
    updates_rx: UpdateReceiver<ImportSettings>,
    state: Mutex<ImportState>,
}

impl ImportNode {
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        settings: ImportSettings,
        registry: Arc<ModuleRegistry>,
        exports: ExportSink,
        default_poll: Duration,
        queue_capacity: usize,
    ) -> Self {
        let (updates_tx, updates_rx) = update_queue(queue_capacity);
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            registry,
            exports,
            default_poll,
            updates_tx,
            updates_rx,
            state: Mutex::new(ImportState {
                settings,
                fingerprint: None,
                installed: Vec::new(),
                error: None,
            }),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Register every declaration of `tree`, withdrawing ones that vanished.
    pub fn install(&self, tree: &ImportTree) {
        let fingerprint = tree.fingerprint();
        let names: Vec<String> = tree
            .all_declarations()
            .iter()
            .map(|d| d.qualified_name())
            .collect();

        let stale: Vec<String> = {
            let mut state = self.state.lock();
            state.error = None;
            if state.fingerprint.as_deref() == Some(fingerprint.as_str()) {
                return;
            }
            state.fingerprint = Some(fingerprint);
            let previous = std::mem::replace(&mut state.installed, names.clone());
            previous.into_iter().filter(|n| !names.contains(n)).collect()
        };

        for decl in tree.all_declarations() {
            self.registry.declare(decl.clone());
        }
        for name in &stale {
            self.registry.remove(name);
        }

        tracing::info!(
            namespace = %self.namespace,
            source = %tree.identity,
            declarations = names.len(),
            "Import installed"
        );

        self.exports.publish(Value::object([
            ("namespace", Value::from(self.namespace.as_str())),
            ("revision", Value::from(tree.revision.as_str())),
            (
                "declarations",
                Value::Array(names.into_iter().map(Value::from).collect()),
            ),
        ]));
    }

    /// Remove everything this node registered.
    pub fn withdraw(&self) {
        let installed = {
            let mut state = self.state.lock();
            state.fingerprint = None;
            std::mem::take(&mut state.installed)
        };
        for name in installed {
            self.registry.remove(&name);
        }
    }

    async fn refresh(&self) {
        let source = self.state.lock().settings.source.clone();
        let identity = source.identity();
        match ImportTree::resolve(source, self.namespace.clone(), Vec::new()).await {
            Ok(tree) => self.install(&tree),
            Err(e) => {
                tracing::warn!(namespace = %self.namespace, source = %identity, error = %e, "Import refresh failed");
                self.state.lock().error = Some(e.to_string());
            }
        }
    }

    fn poll_interval(&self) -> Option<Duration> {
        let state = self.state.lock();
        state
            .settings
            .source
            .polled()
            .then(|| state.settings.poll_frequency.unwrap_or(self.default_poll))
    }
}

#[async_trait]
impl Component for ImportNode {
    async fn run(&self, cancel: CancellationToken) -> Result<(), ComponentError> {
        loop {
            let poll = self.poll_interval();
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                settings = self.updates_rx.recv() => {
                    self.state.lock().settings = settings;
                    self.refresh().await;
                }
                _ = tokio::time::sleep(poll.unwrap_or_default()), if poll.is_some() => {
                    self.refresh().await;
                }
            }
        }
    }

    fn update(&self, args: Value) -> Result<(), ComponentError> {
        let settings = ImportSettings::from_args(&self.kind, &args, None)?;
        self.updates_tx.push(settings);
        Ok(())
    }

    fn health(&self) -> Option<Health> {
        self.state
            .lock()
            .error
            .as_ref()
            .map(|e| Health::unhealthy(FailureKind::Config, e.clone()))
    }
}
