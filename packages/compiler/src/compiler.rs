//! Document compiler: pit text in, [`Dom`] out.
//!
//! A compile runs these steps in order, and the first failure aborts it:
//!
//! 1. `##KEY##` defines substitution
//! 2. XML parse and structural schema check
//! 3. root dispatch (`<Peach>`, legacy namespace rejected)
//! 4. `Include`, `Import`, `PythonPath`
//! 5. `Defaults`
//! 6. top-level data models, each bound right after it is built
//! 7. `Data`
//! 8. `StateModel` and `Agent`
//! 9. `Test`
//! 10. [`CompilerHooks::finish_document`]

use std::collections::BTreeSet;
use std::sync::Arc;

use roxmltree::{Document, Node};
use serde::Serialize;

use crate::assembler::Assembler;
use crate::binder;
use crate::builder::DataElementBuilder;
use crate::config::{CompileOptions, FILE_URL_PREFIX, LEGACY_NAMESPACE_MARKER, ROOT_ELEMENT};
use crate::dataset::DatasetBuilder;
use crate::defines::Defines;
use crate::dom::{DataElement, DataModel, Dom, Namespace, StateModel};
use crate::error::{CompileError, Diagnostic, Result};
use crate::expression::{ExpressionEvaluator, SimpleEvaluator};
use crate::registry::{create_default_registry, Registry};
use crate::schema;
use crate::script::{DefaultScriptHost, ScriptError, ScriptHost};
use crate::session::CompileSession;
use crate::xml::{element_children, find_children, get_tag_name, required_attr};

/// Extension points for compilers that build on this one.
///
/// Every method has a default, so implementors override only what they need.
pub trait CompilerHooks: Send + Sync {
    fn create_dom(&self, name: &str) -> Dom {
        Dom::new(name)
    }

    fn create_state_model(&self, name: &str, initial_state: &str) -> StateModel {
        StateModel::new(name, initial_state)
    }

    fn create_data_model(&self, root: DataElement) -> DataModel {
        DataModel::new(root)
    }

    /// Runs once the built-in passes are done, before the Dom is returned.
    fn finish_document(
        &self,
        _dom: &mut Dom,
        _root: Node<'_, '_>,
        _session: &mut CompileSession,
    ) -> Result<()> {
        Ok(())
    }
}

/// Hooks that add nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl CompilerHooks for DefaultHooks {}

/// Loads the text behind an `<Include src="...">`.
pub trait PitResource: Send + Sync {
    fn load(&self, source: &str, options: &CompileOptions) -> Result<String>;
}

/// Reads include sources from disk, relative to the base directory.
///
/// A leading `file:` is stripped.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileResource;

impl PitResource for FileResource {
    fn load(&self, source: &str, options: &CompileOptions) -> Result<String> {
        let source = source.strip_prefix(FILE_URL_PREFIX).unwrap_or(source);
        let path = options.resolve_path(source);
        std::fs::read_to_string(&path).map_err(|source| CompileError::Io { path, source })
    }
}

/// Result of a successful compile.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Compiled {
    pub dom: Dom,
    /// Define keys that replaced at least one occurrence, includes counted.
    pub used_defines: BTreeSet<String>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Compiles pit documents.
///
/// # Examples
/// ```
/// use pit_compiler::compiler::PitCompiler;
/// use pit_compiler::defines::Defines;
///
/// let pit = r###"<Peach>
///     <DataModel name="Hello">
///         <String name="greeting" value="##WHO##"/>
///     </DataModel>
/// </Peach>"###;
///
/// let mut defines = Defines::new();
/// defines.insert("WHO", "world");
///
/// let compiled = PitCompiler::new().compile(pit, &defines, Some("hello.xml")).unwrap();
/// assert!(compiled.dom.find_data_model("Hello").is_some());
/// assert!(compiled.used_defines.contains("WHO"));
/// ```
pub struct PitCompiler {
    registry: Arc<Registry>,
    options: CompileOptions,
    evaluator: Box<dyn ExpressionEvaluator>,
    script_host: Box<dyn ScriptHost>,
    resource: Box<dyn PitResource>,
    hooks: Box<dyn CompilerHooks>,
}

impl PitCompiler {
    /// Compiler with the built-in registry and default collaborators.
    #[must_use]
    pub fn new() -> Self {
        Self::with_registry(Arc::new(create_default_registry()))
    }

    #[must_use]
    pub fn with_registry(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            options: CompileOptions::default(),
            evaluator: Box::new(SimpleEvaluator),
            script_host: Box::new(DefaultScriptHost::new()),
            resource: Box::new(FileResource),
            hooks: Box::new(DefaultHooks),
        }
    }

    #[must_use]
    pub fn options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn evaluator(mut self, evaluator: impl ExpressionEvaluator + 'static) -> Self {
        self.evaluator = Box::new(evaluator);
        self
    }

    #[must_use]
    pub fn script_host(mut self, host: impl ScriptHost + 'static) -> Self {
        self.script_host = Box::new(host);
        self
    }

    #[must_use]
    pub fn resource(mut self, resource: impl PitResource + 'static) -> Self {
        self.resource = Box::new(resource);
        self
    }

    #[must_use]
    pub fn hooks(mut self, hooks: impl CompilerHooks + 'static) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn compile_options(&self) -> &CompileOptions {
        &self.options
    }

    /// Compile `text` into a Dom.
    ///
    /// `source_name` names the document in schema errors and becomes the
    /// Dom's file name.
    pub fn compile(
        &mut self,
        text: &str,
        defines: &Defines,
        source_name: Option<&str>,
    ) -> Result<Compiled> {
        let mut session = CompileSession::new();
        let dom = self.compile_document(text, defines, source_name, 0, &mut session)?;
        tracing::debug!(
            data_models = dom.data_models.len(),
            state_models = dom.state_models.len(),
            tests = dom.tests.len(),
            "Compiled pit"
        );
        Ok(Compiled {
            dom,
            used_defines: session.used_defines,
            diagnostics: session.diagnostics,
        })
    }

    /// Check `text` without building a Dom.
    ///
    /// Runs defines substitution, the XML parse and the schema check only.
    pub fn validate(&self, text: &str, defines: &Defines, source_name: Option<&str>) -> Result<()> {
        let (text, _) = defines.substitute(text);
        let doc = Document::parse(&text)?;
        if self.options.validate_schema {
            schema::validate(&doc, &self.registry, source_name)?;
        }
        Ok(())
    }

    fn compile_document(
        &mut self,
        text: &str,
        defines: &Defines,
        source_name: Option<&str>,
        depth: usize,
        session: &mut CompileSession,
    ) -> Result<Dom> {
        let (text, used) = defines.substitute(text);
        session.used_defines.extend(used);

        let doc = Document::parse(&text)?;
        if self.options.validate_schema {
            schema::validate(&doc, &self.registry, source_name)?;
        }

        let root = doc.root_element();
        if get_tag_name(root) != ROOT_ELEMENT {
            return Err(CompileError::InvalidRoot(get_tag_name(root).to_string()));
        }
        if root
            .tag_name()
            .namespace()
            .is_some_and(|ns| ns.contains(LEGACY_NAMESPACE_MARKER))
        {
            return Err(CompileError::LegacyNamespace);
        }

        let mut dom = self.hooks.create_dom(source_name.unwrap_or_default());
        dom.file_name = source_name.map(str::to_string);

        tracing::debug!(depth, "Pass 1: includes and scripts");
        self.load_includes_and_scripts(root, defines, depth, &mut dom, session)?;

        tracing::debug!("Pass 2: defaults");
        for node in find_children(root, "Defaults") {
            session.defaults.load(node, &mut session.diagnostics)?;
        }

        tracing::debug!("Pass 3: data models");
        self.build_data_models(root, &mut dom, session)?;

        tracing::debug!("Pass 4: data sets");
        for node in find_children(root, "Data") {
            let name = dom.datas.unique_name("Data");
            let data = DatasetBuilder::new(&dom, &self.options, self.evaluator.as_ref())
                .build(node, &name)?;
            dom.datas.insert(data)?;
        }

        tracing::debug!("Pass 5: state models and agents");
        for node in element_children(root) {
            match get_tag_name(node) {
                "StateModel" => {
                    let model = self.assembler(&dom, session).build_state_model(node)?;
                    dom.state_models.insert(model)?;
                }
                "Agent" => {
                    let agent = self.assembler(&dom, session).build_agent(node)?;
                    dom.agents.insert(agent)?;
                }
                _ => {}
            }
        }

        tracing::debug!("Pass 6: tests");
        for node in find_children(root, "Test") {
            let test = self.assembler(&dom, session).build_test(node)?;
            dom.tests.insert(test)?;
        }

        self.hooks.finish_document(&mut dom, root, session)?;
        Ok(dom)
    }

    fn assembler<'c>(&'c self, dom: &'c Dom, session: &'c mut CompileSession) -> Assembler<'c> {
        Assembler::new(
            &self.registry,
            dom,
            &self.options,
            self.evaluator.as_ref(),
            self.hooks.as_ref(),
            session,
        )
    }

    fn load_includes_and_scripts(
        &mut self,
        root: Node<'_, '_>,
        defines: &Defines,
        depth: usize,
        dom: &mut Dom,
        session: &mut CompileSession,
    ) -> Result<()> {
        for node in element_children(root) {
            match get_tag_name(node) {
                "Include" => {
                    let namespace = self.include(node, defines, depth, session)?;
                    for path in &namespace.dom.python_paths {
                        push_unique(&mut dom.python_paths, path);
                    }
                    for module in &namespace.dom.python_modules {
                        push_unique(&mut dom.python_modules, module);
                    }
                    dom.namespaces.insert(namespace)?;
                }
                "Import" => {
                    let module = required_attr(node, "import")?;
                    self.script_host
                        .import_module(module)
                        .map_err(script_error)?;
                    push_unique(&mut dom.python_modules, module);
                }
                "PythonPath" => {
                    let path = required_attr(node, "path")?;
                    self.script_host
                        .add_search_path(path)
                        .map_err(script_error)?;
                    push_unique(&mut dom.python_paths, path);
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Compile the pit behind `<Include ns src>` into a namespace.
    fn include(
        &mut self,
        node: Node<'_, '_>,
        defines: &Defines,
        depth: usize,
        session: &mut CompileSession,
    ) -> Result<Namespace> {
        let ns = required_attr(node, "ns")?;
        let src = required_attr(node, "src")?;
        if depth >= self.options.max_include_depth {
            return Err(CompileError::IncludeDepth(self.options.max_include_depth));
        }
        tracing::debug!(ns, src, "Including pit");

        let wrap = |source: CompileError| CompileError::Include {
            path: src.to_string(),
            source: Box::new(source),
        };
        let text = self.resource.load(src, &self.options).map_err(wrap)?;

        // Each document gets its own defaults and auto-name counter.
        let mut included = CompileSession::new();
        let dom = self
            .compile_document(&text, defines, Some(src), depth + 1, &mut included)
            .map_err(wrap)?;

        session.used_defines.extend(included.used_defines);
        session.diagnostics.extend(included.diagnostics);

        Ok(Namespace {
            name: ns.to_string(),
            dom: Dom {
                name: ns.to_string(),
                ..dom
            },
        })
    }

    fn build_data_models(
        &self,
        root: Node<'_, '_>,
        dom: &mut Dom,
        session: &mut CompileSession,
    ) -> Result<()> {
        for node in element_children(root) {
            if self.registry.data_model_factory(get_tag_name(node)).is_none() {
                continue;
            }
            let built =
                DataElementBuilder::new(&self.registry, dom, self.evaluator.as_ref(), session)
                    .build_data_model(node)?;
            let mut model = self.hooks.create_data_model(built.root);
            binder::bind(&mut model)?;
            if dom.data_models.contains(&model.root.name) {
                return Err(CompileError::DuplicateName {
                    kind: get_tag_name(node).to_string(),
                    name: model.root.name,
                    scope: None,
                });
            }
            dom.data_models.insert(model)?;
        }
        Ok(())
    }
}

impl Default for PitCompiler {
    fn default() -> Self {
        Self::new()
    }
}

fn script_error(error: ScriptError) -> CompileError {
    match error {
        ScriptError::AlreadyLoaded(module) => CompileError::ScriptAlreadyLoaded(module),
        ScriptError::Failed { module, message } => CompileError::Script {
            target: module,
            message,
        },
    }
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}
