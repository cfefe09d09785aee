//! Element factory trait definition.

use roxmltree::Node;

use crate::builder::DataElementBuilder;
use crate::dom::{DataElement, ElementKindTag};
use crate::error::Result;

/// Where an element is being built.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scope<'s> {
    /// Name of the enclosing element, if any.
    pub parent: Option<&'s str>,
    /// Kind of the enclosing element, if any.
    pub parent_kind: Option<ElementKindTag>,
}

impl<'s> Scope<'s> {
    /// Scope of a top-level data model.
    #[must_use]
    pub fn top_level() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn within(parent: &'s DataElement) -> Self {
        Self {
            parent: Some(&parent.name),
            parent_kind: Some(parent.tag()),
        }
    }
}

/// Builds one kind of data element from its XML node.
///
/// Factories receive the builder so that they can apply the common
/// attributes, descend into children and attach common children the same way
/// every other kind does.
pub trait ElementFactory: Send + Sync {
    /// Kind of element this factory produces.
    fn kind(&self) -> ElementKindTag;

    /// Build the element described by `node`.
    fn build(
        &self,
        node: Node<'_, '_>,
        builder: &mut DataElementBuilder<'_>,
        scope: &Scope<'_>,
    ) -> Result<DataElement>;
}
