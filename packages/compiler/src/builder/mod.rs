//! Data element builder.
//!
//! Recursive descent over a data model's XML. Each tag is looked up in the
//! [`Registry`] and built by its [`ElementFactory`](crate::registry::ElementFactory);
//! factories call back into [`DataElementBuilder`] for the parts every kind
//! shares:
//!
//! - common attributes (`fieldId`, `token`, `mutable`, `constraint`,
//!   `lengthType`, `length`)
//! - `value`/`valueType` coercion
//! - common children (`Relation`, `Fixup`, `Transformer`, `Hint`,
//!   `Analyzer`, `Placement`)
//! - array wrapping on `minOccurs`/`maxOccurs`/`occurs`
//! - reference overrides inside containers cloned through `ref`

pub mod elements;

use roxmltree::Node;

use crate::coercion::{self, ValueKind};
use crate::dom::{
    ArraySpec, Container, DataElement, DataModel, Dom, ElementKind, LengthType, Placement,
    PlacementKind, Relation, RelationKind, TransformerChain,
};
use crate::error::{CompileError, Result};
use crate::expression::{EvalScope, ExpressionEvaluator};
use crate::plugin::{Analyzers, Fixups, PluginResolver, Transformers};
use crate::registry::{Registry, Scope};
use crate::session::{CompileSession, DefaultsTable};
use crate::xml::{
    attr_bool, attr_i64, attr_u64, describe, element_children, find_children, get_tag_name,
    required_attr,
};

/// Builds data element trees for one compile.
pub struct DataElementBuilder<'c> {
    registry: &'c Registry,
    dom: &'c Dom,
    evaluator: &'c dyn ExpressionEvaluator,
    session: &'c mut CompileSession,
}

impl<'c> DataElementBuilder<'c> {
    /// `dom` is the document built so far; `ref` attributes resolve against it.
    pub fn new(
        registry: &'c Registry,
        dom: &'c Dom,
        evaluator: &'c dyn ExpressionEvaluator,
        session: &'c mut CompileSession,
    ) -> Self {
        Self {
            registry,
            dom,
            evaluator,
            session,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &'c Registry {
        self.registry
    }

    #[must_use]
    pub fn dom(&self) -> &'c Dom {
        self.dom
    }

    #[must_use]
    pub fn defaults(&self) -> &DefaultsTable {
        &self.session.defaults
    }

    /// Build a top-level data model from a registered top-level tag.
    pub fn build_data_model(&mut self, node: Node<'_, '_>) -> Result<DataModel> {
        let tag = get_tag_name(node);
        let factory = self
            .registry
            .data_model_factory(tag)
            .ok_or_else(|| CompileError::UnknownElement {
                kind: "top-level",
                tag: tag.to_string(),
                context: None,
            })?;
        let root = factory.build(node, self, &Scope::top_level())?;
        tracing::debug!(model = %root.name, "Built data model");
        Ok(DataModel::new(root))
    }

    /// The `name` attribute, or a generated `DataElement_N`.
    pub fn element_name(&mut self, node: Node<'_, '_>) -> String {
        match node.attribute("name") {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self.session.auto_name(),
        }
    }

    /// Create the element and apply the common attributes.
    pub fn begin(&mut self, node: Node<'_, '_>, kind: ElementKind) -> Result<DataElement> {
        let name = self.element_name(node);
        let mut element = DataElement::new(name, kind);
        self.apply_common_attributes(node, &mut element)?;
        Ok(element)
    }

    /// Apply the value and attach common children.
    pub fn finish(&mut self, node: Node<'_, '_>, element: &mut DataElement) -> Result<()> {
        self.apply_value(node, element)?;
        self.apply_common_children(node, element)
    }

    pub fn apply_common_attributes(
        &mut self,
        node: Node<'_, '_>,
        element: &mut DataElement,
    ) -> Result<()> {
        if let Some(field_id) = node.attribute("fieldId") {
            element.field_id = Some(field_id.to_string());
        }
        if let Some(token) = attr_bool(node, "token")? {
            element.is_token = token;
        }
        if let Some(mutable) = attr_bool(node, "mutable")? {
            element.is_mutable = mutable;
        }
        if let Some(constraint) = node.attribute("constraint") {
            element.constraint = Some(constraint.to_string());
        }

        for attribute in ["pointer", "pointerDepth"] {
            if node.has_attribute(attribute) {
                return Err(CompileError::UnsupportedAttribute {
                    element: element.name.clone(),
                    attribute: attribute.to_string(),
                    reason: "pointers are not implemented".to_string(),
                });
            }
        }

        let length_type = node
            .attribute("lengthType")
            .or_else(|| self.session.defaults.get(element.tag(), "lengthType"));
        if let Some(value) = length_type {
            element.length_type = LengthType::parse(value).ok_or_else(|| {
                CompileError::invalid_attribute(
                    &element.name,
                    "lengthType",
                    value,
                    "expected bytes, bits or chars",
                )
            })?;
        }

        if let Some(length) = attr_u64(node, "length")? {
            element.length = Some(length);
        }
        Ok(())
    }

    /// Coerce `value`/`valueType` into the element's default value.
    pub fn apply_value(&mut self, node: Node<'_, '_>, element: &mut DataElement) -> Result<()> {
        let Some(raw) = node.attribute("value") else {
            return Ok(());
        };

        let value_type = node
            .attribute("valueType")
            .or_else(|| self.session.defaults.get(element.tag(), "valueType"))
            .unwrap_or("string");
        let kind = ValueKind::parse(value_type).ok_or_else(|| {
            CompileError::invalid_attribute(
                &element.name,
                "valueType",
                value_type,
                "invalid value for 'valueType' attribute",
            )
        })?;

        let scope = EvalScope {
            element: Some(&*element),
            node: Some(node),
            document: Some(self.dom),
            ..EvalScope::default()
        };
        let value = coercion::coerce(raw, kind, self.evaluator, &scope)
            .and_then(|value| coercion::sanitize(element, value))
            .map_err(|reason| CompileError::coercion(&element.name, reason))?;

        element.default_value = Some(value);
        Ok(())
    }

    /// Attach Relation, Fixup, Transformer, Hint, Analyzer and Placement
    /// children in document order.
    pub fn apply_common_children(
        &mut self,
        node: Node<'_, '_>,
        element: &mut DataElement,
    ) -> Result<()> {
        for child in element_children(node) {
            match get_tag_name(child) {
                "Relation" => {
                    if let Some(relation) = parse_relation(child, &element.name)? {
                        element.relations.push(relation);
                    }
                }
                "Fixup" => {
                    if element.fixup.is_some() {
                        return Err(CompileError::MultiplePlugins {
                            what: "fixups",
                            element: element.name.clone(),
                        });
                    }
                    element.fixup = Some(self.resolver().resolve::<Fixups>(
                        child,
                        Some(&element.name),
                        &mut self.session.diagnostics,
                    )?);
                }
                "Transformer" => {
                    if element.transformer.is_some() {
                        return Err(CompileError::MultiplePlugins {
                            what: "transformers",
                            element: element.name.clone(),
                        });
                    }
                    element.transformer = Some(self.build_transformer(child, &element.name)?);
                }
                "Hint" => {
                    let name = required_attr(child, "name")?;
                    let value = required_attr(child, "value")?;
                    tracing::trace!(element = %element.name, hint = name, value, "Hint");
                    element.hints.insert(name.to_string(), value.to_string());
                }
                "Analyzer" => {
                    if element.analyzer.is_some() {
                        return Err(CompileError::MultiplePlugins {
                            what: "analyzers",
                            element: element.name.clone(),
                        });
                    }
                    element.analyzer = Some(self.resolver().resolve::<Analyzers>(
                        child,
                        Some(&element.name),
                        &mut self.session.diagnostics,
                    )?);
                }
                "Placement" => {
                    element.placement = Some(parse_placement(child)?);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn resolver(&self) -> PluginResolver<'c> {
        PluginResolver::new(self.registry)
    }

    fn build_transformer(&mut self, node: Node<'_, '_>, element: &str) -> Result<TransformerChain> {
        let transformer =
            self.resolver()
                .resolve::<Transformers>(node, Some(element), &mut self.session.diagnostics)?;

        let mut nested = find_children(node, "Transformer");
        let inner = match nested.next() {
            Some(child) => Some(Box::new(self.build_transformer(child, element)?)),
            None => None,
        };
        if nested.next().is_some() {
            return Err(CompileError::MultiplePlugins {
                what: "nested transformers",
                element: element.to_string(),
            });
        }

        Ok(TransformerChain { transformer, inner })
    }

    /// Build one child node.
    ///
    /// Returns `None` for common children, which the parent attaches itself.
    pub fn build_child(
        &mut self,
        node: Node<'_, '_>,
        scope: &Scope<'_>,
    ) -> Result<Option<DataElement>> {
        let tag = get_tag_name(node);
        let Some(factory) = self.registry.element_factory(tag) else {
            if self.registry.is_common_child(tag) {
                return Ok(None);
            }
            return Err(CompileError::UnknownElement {
                kind: "data",
                tag: tag.to_string(),
                context: scope.parent.map(|p| format!("'{p}'")),
            });
        };

        let element = factory.build(node, self, scope)?;
        wrap_array(node, element).map(Some)
    }

    /// Build every data child of `node` into `parent`.
    ///
    /// When `parent` was cloned through `ref`, children override existing
    /// elements of the same name and dotted names reach into descendants.
    pub fn build_children(
        &mut self,
        node: Node<'_, '_>,
        parent: &mut DataElement,
        is_reference: bool,
    ) -> Result<()> {
        let parent_name = parent.name.clone();
        let scope = Scope {
            parent: Some(parent_name.as_str()),
            parent_kind: Some(parent.tag()),
        };

        for child in element_children(node) {
            let name = child.attribute("name").unwrap_or_default();
            let Some(mut element) = self.build_child(child, &scope)? else {
                continue;
            };

            if is_reference && !name.is_empty() {
                let (path, last): (Vec<&str>, &str) = match name.rsplit_once('.') {
                    Some((path, last)) => (path.split('.').collect(), last),
                    None => (Vec::new(), name),
                };
                rename(&mut element, last);
                let target = resolve_override_parent(parent, &path, &describe(child), name)?;
                apply_reference(target, element)?;
            } else {
                let children = parent.children_mut().ok_or_else(|| {
                    CompileError::invalid_attribute(
                        &parent_name,
                        "children",
                        get_tag_name(child),
                        "element cannot hold children",
                    )
                })?;
                children.insert_scoped(element, &parent_name)?;
            }
        }
        Ok(())
    }

    /// Clone the element a `ref` attribute names.
    pub fn resolve_ref(&self, name: &str, context: &str) -> Result<DataElement> {
        self.dom
            .find_element(name)
            .cloned()
            .ok_or_else(|| CompileError::unresolved("ref", name, Some(context.to_string())))
    }
}

fn rename(element: &mut DataElement, name: &str) {
    element.name = name.to_string();
    if let ElementKind::Array(array) = &mut element.kind {
        array.template.name = name.to_string();
    }
}

/// Walk a dotted override path to the container it targets.
fn resolve_override_parent<'e>(
    parent: &'e mut DataElement,
    path: &[&str],
    child: &str,
    full_name: &str,
) -> Result<&'e mut Container> {
    let mut current = parent;
    for segment in path {
        let label = current.name.clone();
        let next = current
            .children_mut()
            .and_then(|children| children.get_mut(segment))
            .ok_or_else(|| {
                CompileError::unresolved(
                    "element",
                    full_name,
                    Some(format!("{child}, '{label}' has no child element named '{segment}'")),
                )
            })?;
        current = next.unwrap_array_mut();
    }

    let label = current.name.clone();
    current.children_mut().ok_or_else(|| {
        CompileError::unresolved(
            "element",
            full_name,
            Some(format!("{child}, '{label}' is not a container element")),
        )
    })
}

/// Replace the child of the same name, or append if there is none.
fn apply_reference(children: &mut Container, element: DataElement) -> Result<()> {
    if let Some(previous) = children.replace(element) {
        tracing::debug!(element = %previous.name, "Overrode referenced element");
    }
    Ok(())
}

fn parse_relation(node: Node<'_, '_>, element: &str) -> Result<Option<Relation>> {
    let kind_attr = required_attr(node, "type")?;
    let kind = RelationKind::parse(kind_attr).ok_or_else(|| {
        CompileError::invalid_attribute(element, "type", kind_attr, "unknown relation type")
    })?;

    let Some(of) = node.attribute("of") else {
        return Ok(None);
    };

    let mut relation = Relation::new(kind, of);
    relation.expression_get = node.attribute("expressionGet").map(str::to_string);
    relation.expression_set = node.attribute("expressionSet").map(str::to_string);

    match kind {
        RelationKind::Size => {
            if let Some(value) = node.attribute("lengthType") {
                relation.length_type = LengthType::parse(value).ok_or_else(|| {
                    CompileError::invalid_attribute(
                        element,
                        "lengthType",
                        value,
                        "size relation has invalid lengthType",
                    )
                })?;
            }
        }
        RelationKind::Offset => {
            relation.relative = node.has_attribute("relative");
            if let Some(anchor) = node.attribute("relativeTo") {
                relation.relative = true;
                relation.relative_to = Some(anchor.to_string());
            }
        }
        RelationKind::Count => {}
    }

    Ok(Some(relation))
}

fn parse_placement(node: Node<'_, '_>) -> Result<Placement> {
    if let Some(target) = node.attribute("after") {
        return Ok(Placement {
            kind: PlacementKind::After,
            target: target.to_string(),
        });
    }
    if let Some(target) = node.attribute("before") {
        return Ok(Placement {
            kind: PlacementKind::Before,
            target: target.to_string(),
        });
    }
    Err(CompileError::missing_attribute("Placement", "after"))
}

/// Wrap `element` in an Array when the node carries occurrence attributes.
///
/// The array takes the element's name and hints; the field id moves to the
/// array. Expansion stays deferred.
fn wrap_array(node: Node<'_, '_>, mut element: DataElement) -> Result<DataElement> {
    let min = attr_u64(node, "minOccurs")?;
    let max = attr_i64(node, "maxOccurs")?;
    let occurs = attr_u64(node, "occurs")?;
    if min.is_none() && max.is_none() && occurs.is_none() {
        return Ok(element);
    }

    let mut min_occurs = 1;
    let mut max_occurs = Some(1);
    let mut count = 1;
    if let Some(min) = min {
        min_occurs = min;
        max_occurs = None;
        count = min;
    }
    if let Some(max) = max {
        max_occurs = u64::try_from(max).ok();
        if max < -1 {
            return Err(CompileError::invalid_attribute(
                &element.name,
                "maxOccurs",
                max.to_string(),
                "must be -1 (unbounded) or a non-negative count",
            ));
        }
    }
    if let Some(occurs) = occurs {
        count = occurs;
    }
    // Only an explicit minOccurs is range checked; the implied minimum of one
    // may exceed maxOccurs="0".
    if let (Some(min), Some(max)) = (min, max_occurs) {
        if min > max {
            return Err(CompileError::invalid_attribute(
                &element.name,
                "minOccurs",
                min.to_string(),
                format!("exceeds maxOccurs {max}"),
            ));
        }
    }

    let name = element.name.clone();
    let hints = element.hints.clone();
    let field_id = element.field_id.take();
    let is_mutable = element.is_mutable;

    let mut array = DataElement::new(
        name,
        ElementKind::Array(ArraySpec::new(element, min_occurs, max_occurs, count)),
    );
    array.hints = hints;
    array.field_id = field_id;
    array.is_mutable = is_mutable;
    Ok(array)
}
