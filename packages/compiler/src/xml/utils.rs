//! XML utility functions for navigating nodes and reading typed attributes.

use roxmltree::Node;

use crate::error::{CompileError, Result};

/// Get the tag name without namespace prefix.
///
/// # Examples
/// ```
/// use roxmltree::Document;
/// use pit_compiler::xml::get_tag_name;
///
/// let xml = r#"<Peach xmlns="http://peachfuzzer.com/2012/Peach"><DataModel/></Peach>"#;
/// let doc = Document::parse(xml).unwrap();
/// let model = doc.root_element().first_element_child().unwrap();
/// assert_eq!(get_tag_name(model), "DataModel");
/// ```
pub fn get_tag_name<'a>(node: Node<'a, '_>) -> &'a str {
    node.tag_name().name()
}

/// Find the first child element with the given tag name.
pub fn find_child<'a, 'input>(node: Node<'a, 'input>, tag: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|child| child.is_element() && get_tag_name(*child) == tag)
}

/// Find all child elements with the given tag name.
pub fn find_children<'a, 'input>(
    node: Node<'a, 'input>,
    tag: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children()
        .filter(move |child| child.is_element() && get_tag_name(*child) == tag)
}

/// Get all element children of a node.
///
/// Comments, processing instructions and text are left out.
pub fn element_children<'a, 'input>(
    node: Node<'a, 'input>,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|child| child.is_element())
}

/// Human readable label for error messages: `Tag 'name'` or `<Tag>`.
pub fn describe(node: Node<'_, '_>) -> String {
    match node.attribute("name") {
        Some(name) => format!("{} '{}'", get_tag_name(node), name),
        None => format!("<{}>", get_tag_name(node)),
    }
}

/// One-based line and column of the node's start tag.
pub fn position(node: Node<'_, '_>) -> (u32, u32) {
    let pos = node.document().text_pos_at(node.range().start);
    (pos.row, pos.col)
}

/// Read an attribute that must be present.
pub fn required_attr<'a>(node: Node<'a, '_>, name: &str) -> Result<&'a str> {
    node.attribute(name)
        .ok_or_else(|| CompileError::missing_attribute(get_tag_name(node), name))
}

/// Parse a boolean the way pit files spell them.
///
/// # Examples
/// ```
/// use pit_compiler::xml::parse_bool;
///
/// assert_eq!(parse_bool("true"), Some(true));
/// assert_eq!(parse_bool("0"), Some(false));
/// assert_eq!(parse_bool("maybe"), None);
/// ```
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

/// Read an optional boolean attribute.
pub fn attr_bool(node: Node<'_, '_>, name: &str) -> Result<Option<bool>> {
    node.attribute(name)
        .map(|value| {
            parse_bool(value).ok_or_else(|| {
                CompileError::invalid_attribute(
                    describe(node),
                    name,
                    value,
                    "could not convert value to a boolean",
                )
            })
        })
        .transpose()
}

/// Read an optional unsigned integer attribute.
pub fn attr_u64(node: Node<'_, '_>, name: &str) -> Result<Option<u64>> {
    node.attribute(name)
        .map(|value| {
            value.trim().parse::<u64>().map_err(|_| {
                CompileError::invalid_attribute(
                    describe(node),
                    name,
                    value,
                    "could not convert value to an unsigned integer",
                )
            })
        })
        .transpose()
}

/// Read an optional signed integer attribute.
pub fn attr_i64(node: Node<'_, '_>, name: &str) -> Result<Option<i64>> {
    node.attribute(name)
        .map(|value| {
            value.trim().parse::<i64>().map_err(|_| {
                CompileError::invalid_attribute(
                    describe(node),
                    name,
                    value,
                    "could not convert value to an integer",
                )
            })
        })
        .transpose()
}

/// Read an optional single-character attribute.
pub fn attr_char(node: Node<'_, '_>, name: &str) -> Result<Option<char>> {
    node.attribute(name)
        .map(|value| {
            let mut chars = value.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(c),
                _ => Err(CompileError::invalid_attribute(
                    describe(node),
                    name,
                    value,
                    "could not convert value to a character",
                )),
            }
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use roxmltree::Document;

    #[test]
    fn test_get_tag_name_with_namespace() {
        let xml = r#"<p:Peach xmlns:p="http://peachfuzzer.com/2012/Peach"><p:Test/></p:Peach>"#;
        let doc = Document::parse(xml).unwrap();
        assert_eq!(get_tag_name(doc.root_element()), "Peach");
    }

    #[test]
    fn test_element_children_skips_comments() {
        let xml = r#"<root><!-- note --><a/>text<b/></root>"#;
        let doc = Document::parse(xml).unwrap();
        let children: Vec<_> = element_children(doc.root_element()).collect();
        assert_eq!(children.len(), 2);
    }

    #[test]
    fn test_find_children() {
        let xml = r#"<root><Param/><Other/><Param/></root>"#;
        let doc = Document::parse(xml).unwrap();
        assert_eq!(find_children(doc.root_element(), "Param").count(), 2);
        assert!(find_child(doc.root_element(), "Other").is_some());
        assert!(find_child(doc.root_element(), "Missing").is_none());
    }

    #[test]
    fn test_describe() {
        let doc = Document::parse(r#"<root><Number name="len"/><Block/></root>"#).unwrap();
        let mut children = element_children(doc.root_element());
        assert_eq!(describe(children.next().unwrap()), "Number 'len'");
        assert_eq!(describe(children.next().unwrap()), "<Block>");
    }

    #[test]
    fn test_position_is_one_based() {
        let doc = Document::parse("<root>\n  <child/>\n</root>").unwrap();
        let child = doc.root_element().first_element_child().unwrap();
        assert_eq!(position(child), (2, 3));
    }

    #[test]
    fn test_typed_attributes() {
        let doc = Document::parse(
            r#"<Number size="16" signed="TRUE" bad="x" pad="ab" c=" " neg="-4"/>"#,
        )
        .unwrap();
        let node = doc.root_element();

        assert_eq!(attr_u64(node, "size").unwrap(), Some(16));
        assert_eq!(attr_bool(node, "signed").unwrap(), Some(true));
        assert_eq!(attr_bool(node, "missing").unwrap(), None);
        assert!(attr_bool(node, "bad").is_err());
        assert!(attr_u64(node, "bad").is_err());
        assert!(attr_char(node, "pad").is_err());
        assert_eq!(attr_char(node, "c").unwrap(), Some(' '));
        assert_eq!(attr_i64(node, "neg").unwrap(), Some(-4));
    }

    #[test]
    fn test_required_attr() {
        let doc = Document::parse(r#"<State name="a"/>"#).unwrap();
        let node = doc.root_element();
        assert_eq!(required_attr(node, "name").unwrap(), "a");
        let err = required_attr(node, "initialState").unwrap_err();
        assert_eq!(
            err.to_string(),
            "<State> is missing required attribute 'initialState'"
        );
    }
}
