//! Per-compile state: the defaults table, diagnostics and counters.

use std::collections::{BTreeSet, HashMap};

use roxmltree::Node;

use crate::config::AUTO_NAME_PREFIX;
use crate::dom::ElementKindTag;
use crate::error::{CompileError, Diagnostic, DiagnosticKind, Result};
use crate::xml::{element_children, get_tag_name, parse_bool};

/// Attributes `<Defaults>` may set, per element kind.
const SUPPORTED_DEFAULTS: &[(ElementKindTag, &[&str])] = &[
    (ElementKindTag::Number, &["endian", "signed", "valueType"]),
    (
        ElementKindTag::String,
        &["lengthType", "padCharacter", "type", "nullTerminated", "valueType"],
    ),
    (ElementKindTag::Flags, &["endian", "size"]),
    (ElementKindTag::Blob, &["lengthType", "valueType"]),
];

fn kind_for_tag(tag: &str) -> Option<(ElementKindTag, &'static [&'static str])> {
    SUPPORTED_DEFAULTS
        .iter()
        .find(|(kind, _)| kind.as_str() == tag)
        .map(|(kind, attrs)| (*kind, *attrs))
}

/// Default attribute values keyed by element kind.
///
/// Each entry holds only the attributes the `<Defaults>` block gave
/// explicitly. A later `<Defaults>` entry for the same kind replaces the
/// earlier one.
#[derive(Debug, Clone, Default)]
pub struct DefaultsTable {
    entries: HashMap<ElementKindTag, HashMap<String, String>>,
}

impl DefaultsTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill the table from a `<Defaults>` node.
    ///
    /// Attributes the kind never consults are reported as diagnostics.
    pub fn load(&mut self, node: Node<'_, '_>, diagnostics: &mut Vec<Diagnostic>) -> Result<()> {
        for child in element_children(node) {
            let tag = get_tag_name(child);
            let (kind, supported) = kind_for_tag(tag).ok_or_else(|| {
                CompileError::UnknownElement {
                    kind: "defaults",
                    tag: tag.to_string(),
                    context: Some("<Defaults> (defaults not supported)".to_string()),
                }
            })?;

            let mut args = HashMap::new();
            for attr in child.attributes() {
                if supported.contains(&attr.name()) {
                    args.insert(attr.name().to_string(), attr.value().to_string());
                } else {
                    let message = format!(
                        "default attribute '{}' on <{}> is not used and has been ignored",
                        attr.name(),
                        tag
                    );
                    tracing::warn!("{message}");
                    diagnostics.push(Diagnostic {
                        kind: DiagnosticKind::IgnoredDefault,
                        message,
                    });
                }
            }
            tracing::debug!(kind = %kind, count = args.len(), "Loaded defaults");
            self.entries.insert(kind, args);
        }
        Ok(())
    }

    /// Set a single default.
    pub fn set(&mut self, kind: ElementKindTag, key: impl Into<String>, value: impl Into<String>) {
        self.entries
            .entry(kind)
            .or_default()
            .insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, kind: ElementKindTag, key: &str) -> Option<&str> {
        self.entries
            .get(&kind)
            .and_then(|args| args.get(key))
            .map(String::as_str)
    }

    pub fn get_bool(&self, kind: ElementKindTag, key: &str) -> Result<Option<bool>> {
        self.get(kind, key)
            .map(|value| {
                parse_bool(value).ok_or_else(|| invalid_default(kind, key, value, "a boolean"))
            })
            .transpose()
    }

    pub fn get_u32(&self, kind: ElementKindTag, key: &str) -> Result<Option<u32>> {
        self.get(kind, key)
            .map(|value| {
                value
                    .trim()
                    .parse()
                    .map_err(|_| invalid_default(kind, key, value, "an integer"))
            })
            .transpose()
    }

    pub fn get_char(&self, kind: ElementKindTag, key: &str) -> Result<Option<char>> {
        self.get(kind, key)
            .map(|value| {
                let mut chars = value.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(c),
                    _ => Err(invalid_default(kind, key, value, "a character")),
                }
            })
            .transpose()
    }
}

fn invalid_default(kind: ElementKindTag, key: &str, value: &str, target: &str) -> CompileError {
    CompileError::invalid_attribute(
        format!("Defaults/{kind}"),
        key,
        value,
        format!("invalid default value, could not convert to {target}"),
    )
}

/// State owned by one compile call.
#[derive(Debug, Default)]
pub struct CompileSession {
    pub defaults: DefaultsTable,
    pub diagnostics: Vec<Diagnostic>,
    pub used_defines: BTreeSet<String>,
    next_auto_name: usize,
}

impl CompileSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next generated element name (`DataElement_0`, `DataElement_1`, ...).
    pub fn auto_name(&mut self) -> String {
        let name = format!("{AUTO_NAME_PREFIX}_{}", self.next_auto_name);
        self.next_auto_name += 1;
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roxmltree::Document;

    fn load(xml: &str) -> Result<(DefaultsTable, Vec<Diagnostic>)> {
        let doc = Document::parse(xml).unwrap();
        let mut table = DefaultsTable::new();
        let mut diagnostics = Vec::new();
        table.load(doc.root_element(), &mut diagnostics)?;
        Ok((table, diagnostics))
    }

    #[test]
    fn test_defaults_hold_only_given_attributes() {
        let (table, diagnostics) =
            load(r#"<Defaults><Number endian="big"/><String type="utf16"/></Defaults>"#).unwrap();
        assert_eq!(table.get(ElementKindTag::Number, "endian"), Some("big"));
        assert_eq!(table.get(ElementKindTag::Number, "signed"), None);
        assert_eq!(table.get(ElementKindTag::String, "type"), Some("utf16"));
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_defaults_for_other_kinds_fail() {
        let err = load(r#"<Defaults><Block name="x"/></Defaults>"#).unwrap_err();
        assert!(err.to_string().contains("defaults not supported"));
    }

    #[test]
    fn test_unused_default_attribute_is_diagnostic() {
        let (table, diagnostics) = load(r#"<Defaults><Flags size="8" length="2"/></Defaults>"#).unwrap();
        assert_eq!(table.get_u32(ElementKindTag::Flags, "size").unwrap(), Some(8));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::IgnoredDefault);
    }

    #[test]
    fn test_typed_getters_reject_bad_values() {
        let mut table = DefaultsTable::new();
        table.set(ElementKindTag::Number, "signed", "maybe");
        table.set(ElementKindTag::String, "padCharacter", "ab");
        assert!(table.get_bool(ElementKindTag::Number, "signed").is_err());
        assert!(table.get_char(ElementKindTag::String, "padCharacter").is_err());
        assert_eq!(table.get_bool(ElementKindTag::Blob, "signed").unwrap(), None);
    }

    #[test]
    fn test_auto_names_count_up() {
        let mut session = CompileSession::new();
        assert_eq!(session.auto_name(), "DataElement_0");
        assert_eq!(session.auto_name(), "DataElement_1");
    }
}
