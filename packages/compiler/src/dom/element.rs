//! Data elements: the nodes of a data model tree.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use super::collection::{Named, NamedCollection};
use super::value::Variant;
use crate::config::MAX_ARRAY_EXPANSION;
use crate::plugin::{Analyzer, Fixup, PluginRef, Transformer};

/// Ordered children of a container element.
pub type Container = NamedCollection<DataElement>;

/// Path of names from a data model root to one of its elements.
///
/// Arrays are transparent: the path segment naming an array also names its
/// template, and further segments continue into the template's children.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ElementPath(pub Vec<String>);

impl ElementPath {
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.to_string());
        Self(segments)
    }

    /// Whether `self` lies inside (or is) `other`.
    #[must_use]
    pub fn starts_with(&self, other: &ElementPath) -> bool {
        self.0.starts_with(&other.0)
    }
}

impl fmt::Display for ElementPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// Element kinds, used as the defaults-table key and in messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ElementKindTag {
    Number,
    String,
    Blob,
    Double,
    Flags,
    Flag,
    Padding,
    Block,
    Choice,
    Array,
}

impl ElementKindTag {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Number => "Number",
            Self::String => "String",
            Self::Blob => "Blob",
            Self::Double => "Double",
            Self::Flags => "Flags",
            Self::Flag => "Flag",
            Self::Padding => "Padding",
            Self::Block => "Block",
            Self::Choice => "Choice",
            Self::Array => "Array",
        }
    }
}

impl fmt::Display for ElementKindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit of an element's `length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthType {
    #[default]
    Bytes,
    Bits,
    Chars,
}

impl LengthType {
    /// Parse `bytes`, `bits` or `chars`, ignoring case.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "bytes" => Some(Self::Bytes),
            "bits" => Some(Self::Bits),
            "chars" => Some(Self::Chars),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    #[default]
    Little,
    Big,
}

impl Endian {
    /// `network` is an alias for big endian.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "little" => Some(Self::Little),
            "big" | "network" => Some(Self::Big),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StringEncoding {
    Ascii,
    Utf7,
    #[default]
    Utf8,
    Utf16,
    Utf16be,
    Utf32,
}

impl StringEncoding {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ascii" => Some(Self::Ascii),
            "utf7" => Some(Self::Utf7),
            "utf8" => Some(Self::Utf8),
            "utf16" => Some(Self::Utf16),
            "utf16be" => Some(Self::Utf16be),
            "utf32" => Some(Self::Utf32),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumberSpec {
    pub size: u32,
    pub signed: bool,
    pub endian: Endian,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StringSpec {
    pub encoding: StringEncoding,
    pub null_terminated: bool,
    pub pad_character: char,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DoubleSpec {
    pub size: u32,
    pub endian: Endian,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlagsSpec {
    pub size: u32,
    pub endian: Endian,
    pub flags: Container,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlagSpec {
    /// Position as written in the pit.
    pub position: u32,
    pub size: u32,
    /// Offset from the first bit on the wire; mirrored for little endian parents.
    pub bit_offset: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaddingSpec {
    /// Alignment in bits.
    pub alignment: u32,
    pub aligned_to: Option<String>,
    pub aligned_to_path: Option<ElementPath>,
    pub min_size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChoiceSpec {
    pub alternatives: Container,
}

/// An element repeated `occurs` times.
///
/// The template stays the single source of truth until
/// [`ArraySpec::ensure_expanded`] is called.
#[derive(Debug, Clone, Serialize)]
pub struct ArraySpec {
    pub min_occurs: u64,
    /// `None` when unbounded.
    pub max_occurs: Option<u64>,
    pub occurs: u64,
    pub template: Box<DataElement>,
    expanded: Option<Container>,
}

impl ArraySpec {
    #[must_use]
    pub fn new(template: DataElement, min_occurs: u64, max_occurs: Option<u64>, occurs: u64) -> Self {
        Self {
            min_occurs,
            max_occurs,
            occurs,
            template: Box::new(template),
            expanded: None,
        }
    }

    #[must_use]
    pub fn is_expanded(&self) -> bool {
        self.expanded.is_some()
    }

    /// Materialize `occurs` copies of the template named `{name}_{index}`.
    pub fn ensure_expanded(&mut self) -> &Container {
        let template = &self.template;
        let occurs = self.occurs;
        self.expanded.get_or_insert_with(|| {
            let count = occurs.min(MAX_ARRAY_EXPANSION);
            if count < occurs {
                tracing::warn!(
                    array = %template.name,
                    occurs,
                    limit = MAX_ARRAY_EXPANSION,
                    "Array expansion truncated"
                );
            }
            let mut elements = Container::new();
            for index in 0..count {
                let mut copy = (**template).clone();
                copy.name = format!("{}_{}", template.name, index);
                elements.replace(copy);
            }
            elements
        })
    }

    /// Expanded elements, if expansion has happened.
    #[must_use]
    pub fn expanded(&self) -> Option<&Container> {
        self.expanded.as_ref()
    }
}

/// Kind-specific part of a data element.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "spec")]
pub enum ElementKind {
    Number(NumberSpec),
    String(StringSpec),
    Blob,
    Double(DoubleSpec),
    Flags(FlagsSpec),
    Flag(FlagSpec),
    Padding(PaddingSpec),
    Block(Container),
    Choice(ChoiceSpec),
    Array(ArraySpec),
}

impl ElementKind {
    #[must_use]
    pub fn tag(&self) -> ElementKindTag {
        match self {
            Self::Number(_) => ElementKindTag::Number,
            Self::String(_) => ElementKindTag::String,
            Self::Blob => ElementKindTag::Blob,
            Self::Double(_) => ElementKindTag::Double,
            Self::Flags(_) => ElementKindTag::Flags,
            Self::Flag(_) => ElementKindTag::Flag,
            Self::Padding(_) => ElementKindTag::Padding,
            Self::Block(_) => ElementKindTag::Block,
            Self::Choice(_) => ElementKindTag::Choice,
            Self::Array(_) => ElementKindTag::Array,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    Size,
    Count,
    Offset,
}

impl RelationKind {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "size" => Some(Self::Size),
            "count" => Some(Self::Count),
            "offset" => Some(Self::Offset),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::Count => "count",
            Self::Offset => "offset",
        }
    }
}

/// A size, count or offset binding from this element to another.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Relation {
    pub kind: RelationKind,
    /// Producer name as written; may be dotted.
    pub of: String,
    /// Producer path, set by the binder.
    pub target: Option<ElementPath>,
    pub expression_get: Option<String>,
    pub expression_set: Option<String>,
    /// Unit of a size relation.
    pub length_type: LengthType,
    /// Offset is measured from the consumer (or `relative_to`).
    pub relative: bool,
    pub relative_to: Option<String>,
    pub relative_to_path: Option<ElementPath>,
}

impl Relation {
    #[must_use]
    pub fn new(kind: RelationKind, of: impl Into<String>) -> Self {
        Self {
            kind,
            of: of.into(),
            target: None,
            expression_get: None,
            expression_set: None,
            length_type: LengthType::Bytes,
            relative: false,
            relative_to: None,
            relative_to_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementKind {
    After,
    Before,
}

/// Directive for the engine to move an element after cracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Placement {
    pub kind: PlacementKind,
    pub target: String,
}

/// A transformer and the transformer nested inside it.
///
/// Encoding runs the outer transformer first.
#[derive(Debug, Clone, Serialize)]
pub struct TransformerChain {
    pub transformer: PluginRef<dyn Transformer>,
    pub inner: Option<Box<TransformerChain>>,
}

impl TransformerChain {
    pub fn encode(&self, data: &[u8]) -> Result<Vec<u8>, String> {
        let encoded = self.transformer.instance.encode(data)?;
        match &self.inner {
            Some(inner) => inner.encode(&encoded),
            None => Ok(encoded),
        }
    }

    /// Number of transformers in the chain.
    #[must_use]
    pub fn depth(&self) -> usize {
        1 + self.inner.as_ref().map_or(0, |inner| inner.depth())
    }
}

/// One node of a data model.
#[derive(Debug, Clone, Serialize)]
pub struct DataElement {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_id: Option<String>,
    pub is_token: bool,
    pub is_mutable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
    pub length_type: LengthType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Variant>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub hints: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub relations: Vec<Relation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixup: Option<PluginRef<dyn Fixup>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transformer: Option<TransformerChain>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<PluginRef<dyn Analyzer>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement: Option<Placement>,
    /// Name of the element this one was cloned from via `ref`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(flatten)]
    pub kind: ElementKind,
}

impl Named for DataElement {
    const KIND: &'static str = "DataElement";

    fn name(&self) -> &str {
        &self.name
    }
}

impl DataElement {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ElementKind) -> Self {
        Self {
            name: name.into(),
            field_id: None,
            is_token: false,
            is_mutable: true,
            constraint: None,
            length_type: LengthType::Bytes,
            length: None,
            default_value: None,
            hints: BTreeMap::new(),
            relations: Vec::new(),
            fixup: None,
            transformer: None,
            analyzer: None,
            placement: None,
            reference: None,
            kind,
        }
    }

    #[must_use]
    pub fn tag(&self) -> ElementKindTag {
        self.kind.tag()
    }

    /// Children that names resolve against.
    ///
    /// Arrays expose their template's children.
    #[must_use]
    pub fn children(&self) -> Option<&Container> {
        match &self.kind {
            ElementKind::Block(children) => Some(children),
            ElementKind::Choice(choice) => Some(&choice.alternatives),
            ElementKind::Flags(flags) => Some(&flags.flags),
            ElementKind::Array(array) => array.template.children(),
            _ => None,
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Container> {
        match &mut self.kind {
            ElementKind::Block(children) => Some(children),
            ElementKind::Choice(choice) => Some(&mut choice.alternatives),
            ElementKind::Flags(flags) => Some(&mut flags.flags),
            ElementKind::Array(array) => array.template.children_mut(),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_container(&self) -> bool {
        self.children().is_some()
    }

    #[must_use]
    pub fn child(&self, name: &str) -> Option<&DataElement> {
        self.children().and_then(|c| c.get(name))
    }

    /// Follow a path of names below this element.
    #[must_use]
    pub fn find_path(&self, segments: &[String]) -> Option<&DataElement> {
        segments
            .iter()
            .try_fold(self, |current, segment| current.child(segment))
    }

    pub fn find_path_mut(&mut self, segments: &[String]) -> Option<&mut DataElement> {
        let mut current = self;
        for segment in segments {
            current = current.children_mut()?.get_mut(segment)?;
        }
        Some(current)
    }

    /// Follow a dotted name (`a.b.c`) below this element.
    #[must_use]
    pub fn find(&self, dotted: &str) -> Option<&DataElement> {
        let segments: Vec<String> = dotted.split('.').map(str::to_string).collect();
        self.find_path(&segments)
    }

    /// The array's template if this is an array, otherwise `self`.
    #[must_use]
    pub fn unwrap_array(&self) -> &DataElement {
        match &self.kind {
            ElementKind::Array(array) => array.template.unwrap_array(),
            _ => self,
        }
    }

    pub fn unwrap_array_mut(&mut self) -> &mut DataElement {
        match self.kind {
            ElementKind::Array(ref mut array) => array.template.unwrap_array_mut(),
            _ => self,
        }
    }
}

/// A top-level data model.
#[derive(Debug, Clone, Serialize)]
pub struct DataModel {
    pub root: DataElement,
    /// Free-form data attached by derived compilers.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl DataModel {
    #[must_use]
    pub fn new(root: DataElement) -> Self {
        Self {
            root,
            extensions: BTreeMap::new(),
        }
    }

    /// Element at `path`, where the empty path is the root.
    #[must_use]
    pub fn element(&self, path: &ElementPath) -> Option<&DataElement> {
        self.root.find_path(path.segments())
    }
}

impl Named for DataModel {
    const KIND: &'static str = "DataModel";

    fn name(&self) -> &str {
        &self.root.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn number(name: &str) -> DataElement {
        DataElement::new(
            name,
            ElementKind::Number(NumberSpec {
                size: 8,
                signed: false,
                endian: Endian::Little,
            }),
        )
    }

    fn block(name: &str, children: Vec<DataElement>) -> DataElement {
        let mut container = Container::new();
        for child in children {
            container.insert(child).unwrap();
        }
        DataElement::new(name, ElementKind::Block(container))
    }

    #[test]
    fn test_find_through_array_template() {
        let template = block("rec", vec![number("len")]);
        let array = DataElement::new(
            "rec",
            ElementKind::Array(ArraySpec::new(template, 1, None, 1)),
        );
        let root = block("Model", vec![array]);

        let found = root.find("rec.len").unwrap();
        assert_eq!(found.name, "len");
        assert_eq!(root.find("rec").unwrap().tag(), ElementKindTag::Array);
        assert!(root.find("rec.missing").is_none());
    }

    #[test]
    fn test_ensure_expanded_names_copies() {
        let mut array = ArraySpec::new(number("item"), 0, Some(5), 3);
        assert!(!array.is_expanded());
        let names: Vec<String> = array
            .ensure_expanded()
            .names()
            .map(str::to_string)
            .collect();
        assert_eq!(names, vec!["item_0", "item_1", "item_2"]);
        assert!(array.is_expanded());
        assert_eq!(array.template.name, "item");
    }

    #[test]
    fn test_find_path_mut() {
        let mut root = block("Model", vec![block("inner", vec![number("x")])]);
        let path = ElementPath(vec!["inner".into(), "x".into()]);
        root.find_path_mut(path.segments()).unwrap().field_id = Some("f".into());
        assert_eq!(root.find("inner.x").unwrap().field_id.as_deref(), Some("f"));
    }

    #[test]
    fn test_parsers() {
        assert_eq!(LengthType::parse("BITS"), Some(LengthType::Bits));
        assert_eq!(LengthType::parse("words"), None);
        assert_eq!(Endian::parse("network"), Some(Endian::Big));
        assert_eq!(StringEncoding::parse("utf16be"), Some(StringEncoding::Utf16be));
        assert_eq!(RelationKind::parse("count"), Some(RelationKind::Count));
    }

    #[test]
    fn test_element_path_display() {
        let path = ElementPath::root().child("a").child("b");
        assert_eq!(path.to_string(), "a.b");
        assert!(path.starts_with(&ElementPath(vec!["a".into()])));
    }
}
