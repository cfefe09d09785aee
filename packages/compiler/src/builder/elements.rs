//! Element factories for the built-in data element kinds.
//!
//! Each factory parses the attributes of its own kind and hands the rest to
//! [`DataElementBuilder`].

use roxmltree::Node;

use super::DataElementBuilder;
use crate::coercion;
use crate::dom::{
    ChoiceSpec, Container, DataElement, DoubleSpec, ElementKind, ElementKindTag, Endian,
    FlagSpec, FlagsSpec, NumberSpec, PaddingSpec, StringEncoding, StringSpec, Variant,
};
use crate::error::{CompileError, Result};
use crate::registry::{ElementFactory, Scope};
use crate::session::DefaultsTable;
use crate::xml::{attr_bool, attr_char, attr_u64, element_children, get_tag_name};

fn attr_u32(node: Node<'_, '_>, name: &str, element: &str) -> Result<Option<u32>> {
    attr_u64(node, name)?
        .map(|value| {
            u32::try_from(value).map_err(|_| {
                CompileError::invalid_attribute(element, name, value.to_string(), "value is too large")
            })
        })
        .transpose()
}

/// `endian` from the node, else the defaults table, else little.
fn endian(
    node: Node<'_, '_>,
    defaults: &DefaultsTable,
    kind: ElementKindTag,
    element: &str,
) -> Result<Endian> {
    let Some(value) = node
        .attribute("endian")
        .or_else(|| defaults.get(kind, "endian"))
    else {
        return Ok(Endian::default());
    };
    Endian::parse(&value.to_ascii_lowercase()).ok_or_else(|| {
        CompileError::invalid_attribute(
            element,
            "endian",
            value,
            "expected little, big or network",
        )
    })
}

/// Name for error messages before the element exists.
fn label<'a>(node: Node<'a, '_>) -> &'a str {
    node.attribute("name").unwrap_or_else(|| get_tag_name(node))
}

/// Handler for `<Number>`.
pub struct NumberFactory;

impl ElementFactory for NumberFactory {
    fn kind(&self) -> ElementKindTag {
        ElementKindTag::Number
    }

    fn build(
        &self,
        node: Node<'_, '_>,
        builder: &mut DataElementBuilder<'_>,
        _scope: &Scope<'_>,
    ) -> Result<DataElement> {
        let name = label(node);
        let size = attr_u32(node, "size", name)?
            .ok_or_else(|| CompileError::missing_attribute("Number", "size"))?;
        if !(1..=64).contains(&size) {
            return Err(CompileError::invalid_attribute(
                name,
                "size",
                size.to_string(),
                "unsupported number size, expected 1 to 64 bits",
            ));
        }

        let defaults = builder.defaults();
        let signed = match attr_bool(node, "signed")? {
            Some(signed) => signed,
            None => defaults
                .get_bool(ElementKindTag::Number, "signed")?
                .unwrap_or(false),
        };
        let endian = endian(node, defaults, ElementKindTag::Number, name)?;

        let mut element = builder.begin(
            node,
            ElementKind::Number(NumberSpec {
                size,
                signed,
                endian,
            }),
        )?;
        builder.finish(node, &mut element)?;
        Ok(element)
    }
}

/// Handler for `<String>`.
pub struct StringFactory;

impl ElementFactory for StringFactory {
    fn kind(&self) -> ElementKindTag {
        ElementKindTag::String
    }

    fn build(
        &self,
        node: Node<'_, '_>,
        builder: &mut DataElementBuilder<'_>,
        _scope: &Scope<'_>,
    ) -> Result<DataElement> {
        let name = label(node);
        for (attribute, replacement) in [
            ("tokens", "use a StringToken analyzer parameter instead"),
            ("analyzer", "use an <Analyzer> child element instead"),
        ] {
            if node.has_attribute(attribute) {
                return Err(CompileError::UnsupportedAttribute {
                    element: name.to_string(),
                    attribute: attribute.to_string(),
                    reason: format!("deprecated, {replacement}"),
                });
            }
        }

        let defaults = builder.defaults();
        let kind = ElementKindTag::String;

        let type_name = node
            .attribute("type")
            .or_else(|| defaults.get(kind, "type"))
            .unwrap_or("utf8");
        let encoding = StringEncoding::parse(&type_name.to_ascii_lowercase()).ok_or_else(|| {
            CompileError::invalid_attribute(name, "type", type_name, "unknown String type")
        })?;

        let null_terminated = match attr_bool(node, "nullTerminated")? {
            Some(value) => value,
            None => defaults.get_bool(kind, "nullTerminated")?.unwrap_or(false),
        };
        let pad_character = match attr_char(node, "padCharacter")? {
            Some(value) => value,
            None => defaults.get_char(kind, "padCharacter")?.unwrap_or('\0'),
        };

        let mut element = builder.begin(
            node,
            ElementKind::String(StringSpec {
                encoding,
                null_terminated,
                pad_character,
            }),
        )?;
        builder.finish(node, &mut element)?;
        Ok(element)
    }
}

/// Handler for `<Blob>`.
///
/// Without a value the default is empty, zero-filled up to `length`.
pub struct BlobFactory;

impl ElementFactory for BlobFactory {
    fn kind(&self) -> ElementKindTag {
        ElementKindTag::Blob
    }

    fn build(
        &self,
        node: Node<'_, '_>,
        builder: &mut DataElementBuilder<'_>,
        _scope: &Scope<'_>,
    ) -> Result<DataElement> {
        let mut element = builder.begin(node, ElementKind::Blob)?;
        builder.finish(node, &mut element)?;
        if element.default_value.is_none() {
            let empty = coercion::sanitize(&element, Variant::Bytes(Vec::new()))
                .map_err(|reason| CompileError::coercion(&element.name, reason))?;
            element.default_value = Some(empty);
        }
        Ok(element)
    }
}

/// Handler for `<Double>`.
pub struct DoubleFactory;

impl ElementFactory for DoubleFactory {
    fn kind(&self) -> ElementKindTag {
        ElementKindTag::Double
    }

    fn build(
        &self,
        node: Node<'_, '_>,
        builder: &mut DataElementBuilder<'_>,
        _scope: &Scope<'_>,
    ) -> Result<DataElement> {
        let name = label(node);
        let size = attr_u32(node, "size", name)?
            .ok_or_else(|| CompileError::missing_attribute("Double", "size"))?;
        if size != 32 && size != 64 {
            return Err(CompileError::invalid_attribute(
                name,
                "size",
                size.to_string(),
                "unsupported double size, expected 32 or 64 bits",
            ));
        }
        let endian = endian(node, builder.defaults(), ElementKindTag::Double, name)?;

        let mut element = builder.begin(node, ElementKind::Double(DoubleSpec { size, endian }))?;
        builder.finish(node, &mut element)?;
        Ok(element)
    }
}

/// Handler for `<Flags>`.
///
/// Children are built through the registry and must all be `<Flag>`. Their
/// placement is checked here since only the parent knows its size and byte
/// order.
pub struct FlagsFactory;

impl ElementFactory for FlagsFactory {
    fn kind(&self) -> ElementKindTag {
        ElementKindTag::Flags
    }

    fn build(
        &self,
        node: Node<'_, '_>,
        builder: &mut DataElementBuilder<'_>,
        _scope: &Scope<'_>,
    ) -> Result<DataElement> {
        let name = label(node);
        let defaults = builder.defaults();
        let size = match attr_u32(node, "size", name)? {
            Some(size) => size,
            None => defaults
                .get_u32(ElementKindTag::Flags, "size")?
                .ok_or_else(|| CompileError::missing_attribute("Flags", "size"))?,
        };
        if !(1..=64).contains(&size) {
            return Err(CompileError::invalid_attribute(
                name,
                "size",
                size.to_string(),
                "unsupported flags size, expected 1 to 64 bits",
            ));
        }
        let endian = endian(node, defaults, ElementKindTag::Flags, name)?;

        let mut element = builder.begin(
            node,
            ElementKind::Flags(FlagsSpec {
                size,
                endian,
                flags: Container::new(),
            }),
        )?;

        let parent = element.name.clone();
        let scope = Scope {
            parent: Some(parent.as_str()),
            parent_kind: Some(ElementKindTag::Flags),
        };
        let mut flags = Container::new();
        for child in element_children(node) {
            let Some(mut flag) = builder.build_child(child, &scope)? else {
                continue;
            };
            let ElementKind::Flag(spec) = &mut flag.kind else {
                return Err(CompileError::UnknownElement {
                    kind: "data",
                    tag: get_tag_name(child).to_string(),
                    context: Some(format!("Flags '{parent}' (only <Flag> children are allowed)")),
                });
            };

            if spec.size == 0 || spec.size > size {
                return Err(CompileError::invalid_attribute(
                    &flag.name,
                    "size",
                    spec.size.to_string(),
                    format!("flag size must be 1 to {size} bits to fit in '{parent}'"),
                ));
            }
            if spec.position.checked_add(spec.size).is_none_or(|end| end > size) {
                return Err(CompileError::invalid_attribute(
                    &flag.name,
                    "position",
                    spec.position.to_string(),
                    format!("flag is placed outside its parent '{parent}'"),
                ));
            }
            if endian == Endian::Little {
                spec.bit_offset = size - spec.size - spec.position;
            }

            let (start, end) = (spec.bit_offset, spec.bit_offset + spec.size);
            let overlapping = flags.iter().find(|other| match &other.kind {
                ElementKind::Flag(o) => start < o.bit_offset + o.size && o.bit_offset < end,
                _ => false,
            });
            if let Some(other) = overlapping {
                return Err(CompileError::invalid_attribute(
                    &flag.name,
                    "position",
                    spec.position.to_string(),
                    format!("flag overlaps with '{}'", other.name),
                ));
            }
            flags.insert_scoped(flag, &parent)?;
        }

        if let ElementKind::Flags(spec) = &mut element.kind {
            spec.flags = flags;
        }
        builder.finish(node, &mut element)?;
        Ok(element)
    }
}

/// Handler for `<Flag>`; only valid inside `<Flags>`.
pub struct FlagFactory;

impl ElementFactory for FlagFactory {
    fn kind(&self) -> ElementKindTag {
        ElementKindTag::Flag
    }

    fn build(
        &self,
        node: Node<'_, '_>,
        builder: &mut DataElementBuilder<'_>,
        scope: &Scope<'_>,
    ) -> Result<DataElement> {
        if scope.parent_kind != Some(ElementKindTag::Flags) {
            return Err(CompileError::UnknownElement {
                kind: "data",
                tag: "Flag".to_string(),
                context: Some(format!(
                    "'{}' (Flag is only allowed inside Flags)",
                    scope.parent.unwrap_or_default()
                )),
            });
        }

        let name = label(node);
        let position = attr_u32(node, "position", name)?
            .ok_or_else(|| CompileError::missing_attribute("Flag", "position"))?;
        let size = attr_u32(node, "size", name)?
            .ok_or_else(|| CompileError::missing_attribute("Flag", "size"))?;

        let mut element = builder.begin(
            node,
            ElementKind::Flag(FlagSpec {
                position,
                size,
                bit_offset: position,
            }),
        )?;
        builder.finish(node, &mut element)?;
        Ok(element)
    }
}

/// Handler for `<Padding>`.
///
/// `alignedTo` is kept by name here and resolved by the binder.
pub struct PaddingFactory;

impl ElementFactory for PaddingFactory {
    fn kind(&self) -> ElementKindTag {
        ElementKindTag::Padding
    }

    fn build(
        &self,
        node: Node<'_, '_>,
        builder: &mut DataElementBuilder<'_>,
        _scope: &Scope<'_>,
    ) -> Result<DataElement> {
        let name = label(node);
        let alignment = attr_u32(node, "alignment", name)?.unwrap_or(8);
        if alignment == 0 {
            return Err(CompileError::invalid_attribute(
                name,
                "alignment",
                "0",
                "alignment must be at least one bit",
            ));
        }

        let spec = PaddingSpec {
            alignment,
            aligned_to: node.attribute("alignedTo").map(str::to_string),
            aligned_to_path: None,
            min_size: attr_u64(node, "minSize")?.unwrap_or(0),
        };
        let mut element = builder.begin(node, ElementKind::Padding(spec))?;
        builder.finish(node, &mut element)?;
        Ok(element)
    }
}

/// Clone the Block or data model `ref` names, for Block and DataModel.
fn build_reference(
    node: Node<'_, '_>,
    builder: &mut DataElementBuilder<'_>,
    reference: &str,
    tag: &str,
) -> Result<DataElement> {
    let context = match node.attribute("name") {
        Some(name) => format!("{tag} '{name}'"),
        None => format!("<{tag}>"),
    };
    let mut element = builder.resolve_ref(reference, &context)?;
    if element.tag() != ElementKindTag::Block {
        return Err(CompileError::invalid_attribute(
            context,
            "ref",
            reference,
            format!("resolved to unsupported element {} '{}'", element.tag(), element.name),
        ));
    }

    element.name = match node.attribute("name") {
        Some(name) if !name.is_empty() => name.to_string(),
        _ if tag == "DataModel" => reference.to_string(),
        _ => builder.element_name(node),
    };
    element.reference = Some(reference.to_string());
    element.default_value = None;
    builder.apply_common_attributes(node, &mut element)?;
    tracing::debug!(element = %element.name, reference, "Cloned referenced block");
    Ok(element)
}

/// Handler for `<Block>`.
pub struct BlockFactory;

impl ElementFactory for BlockFactory {
    fn kind(&self) -> ElementKindTag {
        ElementKindTag::Block
    }

    fn build(
        &self,
        node: Node<'_, '_>,
        builder: &mut DataElementBuilder<'_>,
        _scope: &Scope<'_>,
    ) -> Result<DataElement> {
        let (mut element, is_reference) = match node.attribute("ref") {
            Some(reference) => (build_reference(node, builder, reference, "Block")?, true),
            None => (builder.begin(node, ElementKind::Block(Container::new()))?, false),
        };
        builder.build_children(node, &mut element, is_reference)?;
        builder.finish(node, &mut element)?;
        Ok(element)
    }
}

/// Handler for `<Choice>`.
pub struct ChoiceFactory;

impl ElementFactory for ChoiceFactory {
    fn kind(&self) -> ElementKindTag {
        ElementKindTag::Choice
    }

    fn build(
        &self,
        node: Node<'_, '_>,
        builder: &mut DataElementBuilder<'_>,
        _scope: &Scope<'_>,
    ) -> Result<DataElement> {
        let mut element = builder.begin(
            node,
            ElementKind::Choice(ChoiceSpec {
                alternatives: Container::new(),
            }),
        )?;
        builder.build_children(node, &mut element, false)?;
        builder.finish(node, &mut element)?;
        Ok(element)
    }
}

/// Handler for the top-level `<DataModel>` tag.
pub struct DataModelFactory;

impl ElementFactory for DataModelFactory {
    fn kind(&self) -> ElementKindTag {
        ElementKindTag::Block
    }

    fn build(
        &self,
        node: Node<'_, '_>,
        builder: &mut DataElementBuilder<'_>,
        _scope: &Scope<'_>,
    ) -> Result<DataElement> {
        let (mut element, is_reference) = match node.attribute("ref") {
            Some(reference) => (build_reference(node, builder, reference, "DataModel")?, true),
            None => {
                if node.attribute("name").is_none_or(str::is_empty) {
                    return Err(CompileError::missing_attribute("DataModel", "name"));
                }
                (builder.begin(node, ElementKind::Block(Container::new()))?, false)
            }
        };
        builder.build_children(node, &mut element, is_reference)?;
        builder.finish(node, &mut element)?;
        Ok(element)
    }
}
