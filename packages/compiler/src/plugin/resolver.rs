//! Generic instantiation of parameterized plugins.

use roxmltree::Node;

use super::types::{ParamKind, ParamMap, PluginCategory, PluginDescriptor, PluginRef};
use crate::error::{CompileError, Diagnostic, DiagnosticKind, ParameterProblem, Result};
use crate::registry::Registry;
use crate::xml::{find_children, required_attr};

/// Read `<Param name value [valueType]>` children into an ordered map.
pub fn read_params(node: Node<'_, '_>) -> Result<ParamMap> {
    let mut params = ParamMap::new();
    for param in find_children(node, "Param") {
        let name = required_attr(param, "name")?;
        let value = required_attr(param, "value")?;
        params.insert_typed(name, value, param.attribute("valueType").map(str::to_string));
    }
    Ok(params)
}

/// Resolves `class` + `<Param>` elements against registered descriptors.
pub struct PluginResolver<'r> {
    registry: &'r Registry,
}

impl<'r> PluginResolver<'r> {
    #[must_use]
    pub fn new(registry: &'r Registry) -> Self {
        Self { registry }
    }

    /// Resolve the plugin declared by `node` (`<Fixup class="...">` etc).
    ///
    /// `parent` names the element the plugin is attached to and only feeds
    /// log context.
    pub fn resolve<C: PluginCategory>(
        &self,
        node: Node<'_, '_>,
        parent: Option<&str>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<PluginRef<C::Object>> {
        let class = required_attr(node, "class")?;
        let params = read_params(node)?;
        self.resolve_class::<C>(class, params, parent, diagnostics)
    }

    /// Resolve a plugin from an already collected class and parameter map.
    pub fn resolve_class<C: PluginCategory>(
        &self,
        class: &str,
        mut params: ParamMap,
        parent: Option<&str>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<PluginRef<C::Object>> {
        let descriptor =
            self.registry
                .plugin(C::KIND, class)
                .ok_or_else(|| CompileError::PluginNotFound {
                    kind: C::KIND,
                    class: class.to_string(),
                })?;

        self.apply_obsolete(descriptor, class, &mut params, parent, diagnostics);
        validate(descriptor, class, &params)?;

        let mut effective = params.clone();
        for param in &descriptor.params {
            if let (false, Some(default)) = (effective.contains(param.name), param.default) {
                effective.insert(param.name, default);
            }
        }

        let instance = C::construct(&descriptor.constructor, &effective)
            .unwrap_or_else(|| {
                Err(format!(
                    "'{}' is registered as a {} but has no matching constructor",
                    descriptor.name, descriptor.kind
                ))
            })
            .map_err(|message| CompileError::PluginConstruction {
                kind: C::KIND,
                class: class.to_string(),
                message,
            })?;

        let element_refs = descriptor
            .params
            .iter()
            .filter(|p| p.kind == ParamKind::ElementRef && params.contains(p.name))
            .map(|p| p.name.to_string())
            .collect();

        tracing::debug!(kind = %C::KIND, class, parent = ?parent, "Resolved plugin");

        Ok(PluginRef {
            class: class.to_string(),
            params,
            element_refs,
            bindings: Default::default(),
            instance,
        })
    }

    fn apply_obsolete(
        &self,
        descriptor: &PluginDescriptor,
        class: &str,
        params: &mut ParamMap,
        parent: Option<&str>,
        diagnostics: &mut Vec<Diagnostic>,
    ) {
        let supplied: Vec<String> = params.names().map(str::to_string).collect();
        for name in supplied {
            if descriptor.find_param(&name).is_some() {
                continue;
            }
            let Some(obsolete) = descriptor.find_obsolete(&name) else {
                continue;
            };
            let removed = params.remove(&name);
            let message = match (obsolete.replacement, removed) {
                (Some(replacement), Some(param)) if !params.contains(replacement) => {
                    params.insert_typed(replacement, param.value, param.value_type);
                    format!(
                        "{} '{}' parameter '{}' is obsolete, use '{}' instead",
                        descriptor.kind, class, name, replacement
                    )
                }
                _ => format!(
                    "{} '{}' parameter '{}' is obsolete and has been ignored",
                    descriptor.kind, class, name
                ),
            };
            tracing::info!(parent = ?parent, "{message}");
            diagnostics.push(Diagnostic {
                kind: DiagnosticKind::ObsoleteParameter,
                message,
            });
        }
    }
}

/// Check supplied parameters against the descriptor.
fn validate(descriptor: &PluginDescriptor, class: &str, params: &ParamMap) -> Result<()> {
    let problem = params
        .names()
        .find(|name| descriptor.find_param(name).is_none())
        .map(|name| ParameterProblem::Unknown(name.to_string()))
        .or_else(|| {
            descriptor
                .params
                .iter()
                .find(|p| p.required && !params.contains(p.name))
                .map(|p| ParameterProblem::Missing(p.name.to_string()))
        });

    match problem {
        Some(problem) => Err(CompileError::PluginParameter {
            kind: descriptor.kind,
            class: class.to_string(),
            problem,
            usage: descriptor.usage(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::builtin::null_publisher;
    use crate::plugin::{
        Constructor, Fixups, ParamDescriptor, PluginKind, Publishers, Strategies,
    };
    use roxmltree::Document;

    fn registry_with_demo() -> Registry {
        Registry::builder()
            .plugin(
                PluginDescriptor::new(
                    PluginKind::Publisher,
                    "Demo",
                    Constructor::Publisher(null_publisher),
                )
                .param(ParamDescriptor::required("Foo", ParamKind::String, "Foo value"))
                .param(ParamDescriptor::optional("Bar", ParamKind::String, None, "Bar value"))
                .obsolete("Baz", None)
                .obsolete("OldFoo", Some("Foo")),
            )
            .build()
    }

    fn resolve_publisher(
        registry: &Registry,
        xml: &str,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<PluginRef<dyn crate::plugin::Publisher>> {
        let doc = Document::parse(xml).unwrap();
        PluginResolver::new(registry).resolve::<Publishers>(doc.root_element(), None, diagnostics)
    }

    #[test]
    fn test_missing_required_lists_all_parameters() {
        let registry = registry_with_demo();
        let err = resolve_publisher(
            &registry,
            r#"<Publisher class="Demo"><Param name="Bar" value="1"/></Publisher>"#,
            &mut Vec::new(),
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("publisher 'Demo' is missing required parameter 'Foo'."));
        assert!(message.contains("Foo: [REQUIRED] Foo value"));
        assert!(message.contains("Bar: [OPTIONAL] Bar value"));
        assert!(message.find("Foo:").unwrap() < message.find("Bar:").unwrap());
    }

    #[test]
    fn test_unknown_parameter_fails() {
        let registry = registry_with_demo();
        let err = resolve_publisher(
            &registry,
            r#"<Publisher class="Demo"><Param name="Foo" value="1"/><Param name="Qux" value="2"/></Publisher>"#,
            &mut Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CompileError::PluginParameter {
                problem: ParameterProblem::Unknown(ref name),
                ..
            } if name == "Qux"
        ));
    }

    #[test]
    fn test_obsolete_parameter_is_a_diagnostic() {
        let registry = registry_with_demo();
        let mut diagnostics = Vec::new();
        let plugin = resolve_publisher(
            &registry,
            r#"<Publisher class="Demo"><Param name="Foo" value="1"/><Param name="Baz" value="2"/></Publisher>"#,
            &mut diagnostics,
        )
        .unwrap();
        assert!(!plugin.params.contains("Baz"));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::ObsoleteParameter);
        assert!(diagnostics[0].message.contains("'Baz'"));
    }

    #[test]
    fn test_obsolete_parameter_renamed() {
        let registry = registry_with_demo();
        let mut diagnostics = Vec::new();
        let plugin = resolve_publisher(
            &registry,
            r#"<Publisher class="Demo"><Param name="OldFoo" value="x"/></Publisher>"#,
            &mut diagnostics,
        )
        .unwrap();
        assert_eq!(plugin.params.get("Foo"), Some("x"));
        assert!(diagnostics[0].message.contains("use 'Foo' instead"));
    }

    #[test]
    fn test_lookup_is_restricted_to_category() {
        let registry = Registry::with_builtins();
        let doc = Document::parse(r#"<Fixup class="Tcp"/>"#).unwrap();
        let err = PluginResolver::new(&registry)
            .resolve::<Fixups>(doc.root_element(), Some("csum"), &mut Vec::new())
            .unwrap_err();
        assert_eq!(err.to_string(), "unable to locate fixup 'Tcp'");
    }

    #[test]
    fn test_defaults_reach_constructor() {
        let registry = Registry::with_builtins();
        let plugin = PluginResolver::new(&registry)
            .resolve_class::<Strategies>("Random", ParamMap::new(), None, &mut Vec::new())
            .unwrap();
        assert!(plugin.params.is_empty());
        assert!(plugin.instance.describe().contains("switchCount=200"));
    }

    #[test]
    fn test_construction_errors_are_wrapped() {
        let registry = Registry::with_builtins();
        let doc = Document::parse(
            r#"<Analyzer class="Regex"><Param name="Regex" value="(unclosed"/></Analyzer>"#,
        )
        .unwrap();
        let err = PluginResolver::new(&registry)
            .resolve::<crate::plugin::Analyzers>(doc.root_element(), None, &mut Vec::new())
            .unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("unable to create instance of 'analyzer' named 'Regex'."));
        assert!(message.contains("Extended error:"));
    }

    #[test]
    fn test_element_ref_parameters_recorded() {
        let registry = Registry::with_builtins();
        let doc = Document::parse(
            r#"<Fixup class="Crc32Fixup"><Param name="ref" value="Body"/></Fixup>"#,
        )
        .unwrap();
        let plugin = PluginResolver::new(&registry)
            .resolve::<Fixups>(doc.root_element(), Some("crc"), &mut Vec::new())
            .unwrap();
        assert_eq!(plugin.element_refs, vec!["ref".to_string()]);
        assert!(plugin.bindings.is_empty());
    }
}
