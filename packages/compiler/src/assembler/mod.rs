//! State model, agent and test assembly.
//!
//! Runs after every data model and dataset of the document is built, so
//! action data models, dataset refs and state model refs all resolve
//! against the finished part of the [`Dom`].

mod agent;
mod state;

use crate::compiler::CompilerHooks;
use crate::config::CompileOptions;
use crate::dom::Dom;
use crate::expression::ExpressionEvaluator;
use crate::registry::Registry;
use crate::session::CompileSession;

/// Builds `<Agent>`, `<StateModel>` and `<Test>` elements for one compile.
pub struct Assembler<'c> {
    registry: &'c Registry,
    dom: &'c Dom,
    options: &'c CompileOptions,
    evaluator: &'c dyn ExpressionEvaluator,
    hooks: &'c dyn CompilerHooks,
    session: &'c mut CompileSession,
}

impl<'c> Assembler<'c> {
    pub fn new(
        registry: &'c Registry,
        dom: &'c Dom,
        options: &'c CompileOptions,
        evaluator: &'c dyn ExpressionEvaluator,
        hooks: &'c dyn CompilerHooks,
        session: &'c mut CompileSession,
    ) -> Self {
        Self {
            registry,
            dom,
            options,
            evaluator,
            hooks,
            session,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use roxmltree::Document;

    use crate::binder;
    use crate::builder::DataElementBuilder;
    use crate::compiler::DefaultHooks;
    use crate::config::CompileOptions;
    use crate::dom::Dom;
    use crate::expression::SimpleEvaluator;
    use crate::registry::Registry;
    use crate::session::CompileSession;
    use crate::xml::element_children;

    use super::Assembler;

    /// Dom holding the `<DataModel>` children of `<Peach>` in `xml`.
    pub fn dom_with_models(registry: &Registry, xml: &str) -> Dom {
        let doc = Document::parse(xml).unwrap();
        let mut dom = Dom::default();
        let mut session = CompileSession::new();
        for node in element_children(doc.root_element()) {
            let mut model = DataElementBuilder::new(registry, &dom, &SimpleEvaluator, &mut session)
                .build_data_model(node)
                .unwrap();
            binder::bind(&mut model).unwrap();
            dom.data_models.insert(model).unwrap();
        }
        dom
    }

    /// Run `f` with an assembler over `dom`.
    pub fn with_assembler<T>(
        registry: &Registry,
        dom: &Dom,
        session: &mut CompileSession,
        f: impl FnOnce(&mut Assembler<'_>) -> T,
    ) -> T {
        let options = CompileOptions::default();
        let mut assembler =
            Assembler::new(registry, dom, &options, &SimpleEvaluator, &DefaultHooks, session);
        f(&mut assembler)
    }
}
