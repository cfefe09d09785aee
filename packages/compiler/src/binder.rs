//! Relation binder.
//!
//! Resolves the element names that relations, offset anchors, fixup
//! parameters and padding `alignedTo` attributes refer to. Binding runs once
//! per data model, after the whole tree is built, so a name may refer to an
//! element declared later in the document.
//!
//! A name is resolved by lexical scope: starting at the consumer's parent and
//! walking up to the model root, each ancestor is tested for its own name and
//! then for a descendant path. Dotted names are allowed, arrays are
//! transparent and choice alternatives are searchable.

use crate::dom::{DataElement, DataModel, ElementKind, ElementPath};
use crate::error::{CompileError, Result};

/// Where one resolved name is stored.
enum Slot {
    Relation(usize),
    RelativeTo(usize),
    Fixup(String),
    AlignedTo,
}

struct Binding {
    consumer: ElementPath,
    slot: Slot,
    target: ElementPath,
}

/// Bind every name in `model`.
///
/// Existing bindings (from a cloned `ref`) are recomputed against this tree.
pub fn bind(model: &mut DataModel) -> Result<()> {
    let mut bindings = Vec::new();
    collect(&model.root, &model.root, &ElementPath::root(), &mut bindings)?;

    let count = bindings.len();
    for binding in bindings {
        let element = model
            .root
            .find_path_mut(binding.consumer.segments())
            .map(DataElement::unwrap_array_mut)
            .ok_or_else(|| CompileError::Render {
                element: binding.consumer.to_string(),
                reason: "element disappeared while binding".to_string(),
            })?;
        apply(element, binding.slot, binding.target);
    }

    tracing::debug!(model = %model.root.name, bindings = count, "Bound data model");
    Ok(())
}

fn apply(element: &mut DataElement, slot: Slot, target: ElementPath) {
    match slot {
        Slot::Relation(index) => {
            if let Some(relation) = element.relations.get_mut(index) {
                relation.target = Some(target);
            }
        }
        Slot::RelativeTo(index) => {
            if let Some(relation) = element.relations.get_mut(index) {
                relation.relative_to_path = Some(target);
            }
        }
        Slot::Fixup(param) => {
            if let Some(fixup) = element.fixup.as_mut() {
                fixup.bindings.insert(param, target);
            }
        }
        Slot::AlignedTo => {
            if let ElementKind::Padding(padding) = &mut element.kind {
                padding.aligned_to_path = Some(target);
            }
        }
    }
}

fn collect(
    root: &DataElement,
    element: &DataElement,
    path: &ElementPath,
    out: &mut Vec<Binding>,
) -> Result<()> {
    let consumer = element.unwrap_array();
    let mut bind = |slot: Slot, name: &str, what: &str| -> Result<()> {
        let target = resolve(root, path, name).ok_or_else(|| {
            CompileError::unresolved(
                what,
                name,
                Some(format!("'{}'", display_path(root, path))),
            )
        })?;
        tracing::trace!(consumer = %path, target = %target, "Bound {what}");
        out.push(Binding {
            consumer: path.clone(),
            slot,
            target,
        });
        Ok(())
    };

    for (index, relation) in consumer.relations.iter().enumerate() {
        bind(
            Slot::Relation(index),
            &relation.of,
            format!("{} relation target", relation.kind.as_str()).as_str(),
        )?;
        if let Some(anchor) = &relation.relative_to {
            bind(Slot::RelativeTo(index), anchor, "relativeTo element")?;
        }
    }
    if let Some(fixup) = &consumer.fixup {
        for param in &fixup.element_refs {
            if let Some(name) = fixup.params.get(param) {
                bind(Slot::Fixup(param.clone()), name, "fixup reference")?;
            }
        }
    }
    if let ElementKind::Padding(padding) = &consumer.kind {
        if let Some(name) = &padding.aligned_to {
            bind(Slot::AlignedTo, name, "alignedTo element")?;
        }
    }

    if let Some(children) = element.children() {
        for child in children {
            collect(root, child, &path.child(&child.name), out)?;
        }
    }
    Ok(())
}

/// Resolve `name` as seen from the element at `consumer`.
#[must_use]
pub fn resolve(root: &DataElement, consumer: &ElementPath, name: &str) -> Option<ElementPath> {
    let segments: Vec<String> = name.split('.').map(str::to_string).collect();
    let (first, rest) = segments.split_first()?;
    let consumer = consumer.segments();

    for depth in (0..consumer.len()).rev() {
        let scope = &consumer[..depth];
        let ancestor = root.find_path(scope)?;

        if ancestor.name == *first && ancestor.find_path(rest).is_some() {
            return Some(join(scope, rest));
        }
        if ancestor.find_path(&segments).is_some() {
            return Some(join(scope, &segments));
        }
    }

    // The root itself, for a consumer that is the root.
    if consumer.is_empty() && root.name == *first && root.find_path(rest).is_some() {
        return Some(ElementPath(rest.to_vec()));
    }
    None
}

fn join(scope: &[String], tail: &[String]) -> ElementPath {
    ElementPath(scope.iter().chain(tail).cloned().collect())
}

fn display_path(root: &DataElement, path: &ElementPath) -> String {
    if path.segments().is_empty() {
        root.name.clone()
    } else {
        format!("{}.{path}", root.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::DataElementBuilder;
    use crate::dom::Dom;
    use crate::expression::SimpleEvaluator;
    use crate::registry::Registry;
    use crate::session::CompileSession;
    use roxmltree::Document;

    fn bound(xml: &str) -> Result<DataModel> {
        let doc = Document::parse(xml).unwrap();
        let registry = Registry::with_builtins();
        let dom = Dom::default();
        let mut session = CompileSession::new();
        let mut builder = DataElementBuilder::new(&registry, &dom, &SimpleEvaluator, &mut session);
        let mut model = builder.build_data_model(doc.root_element())?;
        bind(&mut model)?;
        Ok(model)
    }

    fn path(dotted: &str) -> ElementPath {
        ElementPath(dotted.split('.').map(str::to_string).collect())
    }

    #[test]
    fn test_forward_reference_binds() {
        let model = bound(
            r#"<DataModel name="M">
                <Number name="len" size="8"><Relation type="size" of="data"/></Number>
                <Blob name="data"/>
            </DataModel>"#,
        )
        .unwrap();
        let len = model.root.find("len").unwrap();
        assert_eq!(len.relations[0].target, Some(path("data")));
    }

    #[test]
    fn test_nearest_scope_wins() {
        let model = bound(
            r#"<DataModel name="M">
                <Blob name="data"/>
                <Block name="inner">
                    <Number name="len" size="8"><Relation type="size" of="data"/></Number>
                    <Blob name="data"/>
                </Block>
                <Number name="outer" size="8"><Relation type="size" of="inner.data"/></Number>
            </DataModel>"#,
        )
        .unwrap();
        assert_eq!(
            model.root.find("inner.len").unwrap().relations[0].target,
            Some(path("inner.data"))
        );
        assert_eq!(
            model.root.find("outer").unwrap().relations[0].target,
            Some(path("inner.data"))
        );
    }

    #[test]
    fn test_ancestor_name_and_arrays_are_transparent() {
        let model = bound(
            r#"<DataModel name="M">
                <Number name="total" size="16"><Relation type="size" of="M"/></Number>
                <Number name="count" size="8"><Relation type="count" of="items"/></Number>
                <Block name="items" minOccurs="0">
                    <Number name="len" size="8"><Relation type="size" of="value"/></Number>
                    <Blob name="value"/>
                </Block>
            </DataModel>"#,
        )
        .unwrap();
        assert_eq!(model.root.find("total").unwrap().relations[0].target, Some(ElementPath::root()));
        assert_eq!(model.root.find("count").unwrap().relations[0].target, Some(path("items")));
        assert_eq!(
            model.root.find("items.len").unwrap().relations[0].target,
            Some(path("items.value"))
        );
    }

    #[test]
    fn test_choice_alternatives_are_searchable() {
        let model = bound(
            r#"<DataModel name="M">
                <Number name="len" size="8"><Relation type="size" of="body.text"/></Number>
                <Choice name="body"><Blob name="raw"/><String name="text"/></Choice>
            </DataModel>"#,
        )
        .unwrap();
        assert_eq!(model.root.find("len").unwrap().relations[0].target, Some(path("body.text")));
    }

    #[test]
    fn test_fixup_offset_and_padding_bind() {
        let model = bound(
            r#"<DataModel name="M">
                <Number name="crc" size="32">
                    <Fixup class="checksums.Crc32Fixup"><Param name="ref" value="payload"/></Fixup>
                </Number>
                <Number name="off" size="8"><Relation type="offset" of="payload" relativeTo="crc"/></Number>
                <Blob name="payload"/>
                <Padding name="pad" alignment="32" alignedTo="payload"/>
            </DataModel>"#,
        )
        .unwrap();

        let crc = model.root.find("crc").unwrap();
        assert_eq!(crc.fixup.as_ref().unwrap().binding("ref"), Some(&path("payload")));

        let off = &model.root.find("off").unwrap().relations[0];
        assert!(off.relative);
        assert_eq!(off.relative_to_path, Some(path("crc")));

        let ElementKind::Padding(pad) = &model.root.find("pad").unwrap().kind else {
            panic!("expected padding");
        };
        assert_eq!(pad.aligned_to_path, Some(path("payload")));
    }

    #[test]
    fn test_unresolved_name_fails() {
        let err = bound(
            r#"<DataModel name="M"><Number name="len" size="8"><Relation type="size" of="ghost"/></Number></DataModel>"#,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "could not resolve size relation target 'ghost' for 'M.len'"
        );
    }
}
