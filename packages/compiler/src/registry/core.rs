//! Registry mapping tag names to element factories and plugin classes.

use std::collections::{HashMap, HashSet};

use super::factory::ElementFactory;
use crate::plugin::{PluginDescriptor, PluginKind};

/// Immutable lookup tables shared by every compile.
///
/// Built through [`RegistryBuilder`]; wrap in an `Arc` to share between
/// compiler instances.
pub struct Registry {
    elements: HashMap<String, Box<dyn ElementFactory>>,
    data_models: HashMap<String, Box<dyn ElementFactory>>,
    common_children: HashSet<String>,
    plugins: Vec<PluginDescriptor>,
    mutators: HashSet<String>,
    default_strategy: String,
}

impl Registry {
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Registry with every built-in element kind and plugin.
    #[must_use]
    pub fn with_builtins() -> Self {
        super::config::create_default_registry()
    }

    /// Factory for a data element tag (`Number`, `Block`, ...).
    #[must_use]
    pub fn element_factory(&self, tag: &str) -> Option<&dyn ElementFactory> {
        self.elements.get(tag).map(|f| f.as_ref())
    }

    /// Factory for a top-level data model tag (`DataModel`).
    #[must_use]
    pub fn data_model_factory(&self, tag: &str) -> Option<&dyn ElementFactory> {
        self.data_models.get(tag).map(|f| f.as_ref())
    }

    /// Whether `tag` is attached to its parent rather than built as a child.
    #[must_use]
    pub fn is_common_child(&self, tag: &str) -> bool {
        self.common_children.contains(tag)
    }

    /// Descriptor for `class` (name or alias) within one plugin category.
    #[must_use]
    pub fn plugin(&self, kind: PluginKind, class: &str) -> Option<&PluginDescriptor> {
        self.plugins
            .iter()
            .find(|p| p.kind == kind && p.matches(class))
    }

    /// All descriptors of one category, in registration order.
    pub fn plugins(&self, kind: PluginKind) -> impl Iterator<Item = &PluginDescriptor> {
        self.plugins.iter().filter(move |p| p.kind == kind)
    }

    #[must_use]
    pub fn has_mutator(&self, name: &str) -> bool {
        self.mutators.contains(name)
    }

    /// Strategy class used when a test declares none.
    #[must_use]
    pub fn default_strategy(&self) -> &str {
        &self.default_strategy
    }

    /// Return set of all registered data element tags.
    #[must_use]
    pub fn element_tags(&self) -> HashSet<&str> {
        self.elements.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("elements", &self.elements.keys().collect::<Vec<_>>())
            .field("data_models", &self.data_models.keys().collect::<Vec<_>>())
            .field("plugins", &self.plugins.len())
            .finish_non_exhaustive()
    }
}

/// Incrementally populates a [`Registry`].
#[derive(Default)]
pub struct RegistryBuilder {
    elements: HashMap<String, Box<dyn ElementFactory>>,
    data_models: HashMap<String, Box<dyn ElementFactory>>,
    common_children: HashSet<String>,
    plugins: Vec<PluginDescriptor>,
    mutators: HashSet<String>,
    default_strategy: Option<String>,
}

impl RegistryBuilder {
    /// Register a factory for a data element tag.
    #[must_use]
    pub fn element(
        mut self,
        tag: impl Into<String>,
        factory: impl ElementFactory + 'static,
    ) -> Self {
        self.elements.insert(tag.into(), Box::new(factory));
        self
    }

    /// Register a factory for a top-level data model tag.
    #[must_use]
    pub fn data_model(
        mut self,
        tag: impl Into<String>,
        factory: impl ElementFactory + 'static,
    ) -> Self {
        self.data_models.insert(tag.into(), Box::new(factory));
        self
    }

    /// Mark tags as common children (skipped by the container walk).
    #[must_use]
    pub fn common_children(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.common_children.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Register a plugin descriptor.
    #[must_use]
    pub fn plugin(mut self, descriptor: PluginDescriptor) -> Self {
        self.plugins.push(descriptor);
        self
    }

    #[must_use]
    pub fn plugins(mut self, descriptors: impl IntoIterator<Item = PluginDescriptor>) -> Self {
        self.plugins.extend(descriptors);
        self
    }

    #[must_use]
    pub fn mutators(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.mutators.extend(names.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn default_strategy(mut self, class: impl Into<String>) -> Self {
        self.default_strategy = Some(class.into());
        self
    }

    #[must_use]
    pub fn build(self) -> Registry {
        Registry {
            elements: self.elements,
            data_models: self.data_models,
            common_children: self.common_children,
            plugins: self.plugins,
            mutators: self.mutators,
            default_strategy: self
                .default_strategy
                .unwrap_or_else(|| crate::plugin::builtin::DEFAULT_STRATEGY.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::elements::BlobFactory;
    use crate::plugin::builtin::null_publisher;
    use crate::plugin::Constructor;

    #[test]
    fn test_registry_element_lookup() {
        let registry = Registry::builder().element("Blob", BlobFactory).build();
        assert!(registry.element_factory("Blob").is_some());
        assert!(registry.element_factory("Number").is_none());
        assert!(registry.data_model_factory("Blob").is_none());
    }

    #[test]
    fn test_registry_common_children() {
        let registry = Registry::builder()
            .common_children(["Relation", "Hint"])
            .build();
        assert!(registry.is_common_child("Hint"));
        assert!(!registry.is_common_child("Block"));
    }

    #[test]
    fn test_plugin_lookup_by_alias_within_kind() {
        let registry = Registry::builder()
            .plugin(
                PluginDescriptor::new(
                    PluginKind::Publisher,
                    "Null",
                    Constructor::Publisher(null_publisher),
                )
                .alias("Nothing"),
            )
            .build();
        assert!(registry.plugin(PluginKind::Publisher, "Nothing").is_some());
        assert!(registry.plugin(PluginKind::Logger, "Null").is_none());
        assert_eq!(registry.plugins(PluginKind::Publisher).count(), 1);
    }

    #[test]
    fn test_default_strategy_fallback() {
        assert_eq!(Registry::builder().build().default_strategy(), "Random");
        assert_eq!(
            Registry::builder()
                .default_strategy("Sequential")
                .build()
                .default_strategy(),
            "Sequential"
        );
    }

    #[test]
    fn test_registry_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Registry>();
    }
}
