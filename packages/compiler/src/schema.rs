//! Structural validation of pit documents.
//!
//! A fixed rule table lists, per element, the attributes it may carry, the
//! ones it must carry and the children it may contain. Every violation in
//! the document is collected before the check fails, so one run reports
//! all of them.

use roxmltree::{Document, Node};

use crate::error::{CompileError, Result, SchemaViolation};
use crate::registry::Registry;
use crate::xml::{element_children, get_tag_name, position};

/// Attributes shared by every data element.
const DATA_ATTRIBUTES: &[&str] = &[
    "name",
    "fieldId",
    "token",
    "mutable",
    "constraint",
    "lengthType",
    "length",
    "value",
    "valueType",
    "minOccurs",
    "maxOccurs",
    "occurs",
    "pointer",
    "pointerDepth",
];

const PLUGIN_CHILDREN: &[&str] = &["Param"];

/// Which attributes an element accepts.
#[derive(Debug, Clone, Copy)]
enum Attributes {
    /// Exactly the listed ones.
    Only(&'static [&'static str]),
    /// The data element attributes plus the listed ones.
    Data(&'static [&'static str]),
    Any,
}

/// Which child elements an element accepts.
#[derive(Debug, Clone, Copy)]
enum Children {
    Only(&'static [&'static str]),
    /// Registered data element tags, common children and the listed ones.
    Data(&'static [&'static str]),
    /// Common children and the listed ones.
    Leaf(&'static [&'static str]),
    /// Registered top-level data model tags and the listed ones.
    Models(&'static [&'static str]),
    /// Not checked below this element.
    Unchecked,
}

#[derive(Debug, Clone, Copy)]
struct Rule {
    attributes: Attributes,
    required: &'static [&'static str],
    children: Children,
}

const fn rule(
    attributes: Attributes,
    required: &'static [&'static str],
    children: Children,
) -> Rule {
    Rule {
        attributes,
        required,
        children,
    }
}

fn plugin_rule(extra: &'static [&'static str]) -> Rule {
    rule(Attributes::Only(extra), &["class"], Children::Only(PLUGIN_CHILDREN))
}

/// Rule for `tag` appearing under `parent`.
fn lookup(registry: &Registry, parent: &str, tag: &str) -> Option<Rule> {
    let found = match (parent, tag) {
        ("Peach", "Include") => rule(Attributes::Only(&["ns", "src"]), &["ns", "src"], Children::Only(&[])),
        ("Peach", "Import") => rule(Attributes::Only(&["import", "from"]), &["import"], Children::Only(&[])),
        ("Peach", "PythonPath") => rule(Attributes::Only(&["path"]), &["path"], Children::Only(&[])),
        ("Peach", "Defaults") => rule(Attributes::Only(&[]), &[], Children::Unchecked),
        ("Peach", "Agent") => rule(
            Attributes::Only(&["name", "location", "password"]),
            &["name"],
            Children::Only(&["Monitor"]),
        ),
        ("Peach", "StateModel") => rule(
            Attributes::Only(&["name", "initialState", "finalState"]),
            &["name", "initialState"],
            Children::Only(&["State"]),
        ),
        (_, "Data") => rule(
            Attributes::Only(&["name", "ref", "fileName", "fieldId"]),
            &[],
            Children::Only(&["Field", "FieldMask"]),
        ),
        ("Peach", "Test") => rule(
            Attributes::Only(&[
                "name",
                "description",
                "waitTime",
                "faultWaitTime",
                "controlIteration",
                "nonDeterministicActions",
                "maxOutputSize",
                "maxBackSearch",
                "targetLifetime",
            ]),
            &["name"],
            Children::Only(&[
                "StateModel",
                "Agent",
                "Publisher",
                "Logger",
                "Strategy",
                "Include",
                "Exclude",
                "Weight",
                "Mutators",
            ]),
        ),
        ("Data", "Field") => rule(
            Attributes::Only(&["name", "xpath", "value", "valueType"]),
            &[],
            Children::Only(&[]),
        ),
        ("Data", "FieldMask") => rule(Attributes::Only(&["select"]), &["select"], Children::Only(&[])),
        ("Agent", "Monitor") => plugin_rule(&["class", "name"]),
        ("StateModel", "State") => rule(
            Attributes::Only(&["name", "fieldId", "onStart", "onComplete"]),
            &[],
            Children::Only(&["Action"]),
        ),
        ("State", "Action") => rule(
            Attributes::Only(&[
                "type",
                "name",
                "fieldId",
                "when",
                "publisher",
                "onStart",
                "onComplete",
                "method",
                "property",
                "ref",
                "setXpath",
                "valueXpath",
            ]),
            &["type"],
            Children::Models(&["Data", "Param", "Result"]),
        ),
        ("Action", "Param") => rule(
            Attributes::Only(&["name", "type"]),
            &[],
            Children::Models(&["Data"]),
        ),
        ("Action", "Result") => rule(Attributes::Only(&["name"]), &[], Children::Models(&[])),
        ("Test", "StateModel") => rule(Attributes::Only(&["ref"]), &["ref"], Children::Only(&[])),
        ("Test", "Agent") => rule(Attributes::Only(&["ref", "platform"]), &["ref"], Children::Only(&[])),
        ("Test", "Publisher") => plugin_rule(&["class", "name", "agent"]),
        ("Test", "Logger" | "Strategy") => plugin_rule(&["class"]),
        ("Test", "Include" | "Exclude") => {
            rule(Attributes::Only(&["ref", "xpath"]), &[], Children::Only(&[]))
        }
        ("Test", "Weight") => rule(
            Attributes::Only(&["xpath", "weight"]),
            &["xpath", "weight"],
            Children::Only(&[]),
        ),
        ("Test", "Mutators") => rule(Attributes::Only(&["mode"]), &["mode"], Children::Only(&["Mutator"])),
        ("Mutators", "Mutator") => rule(Attributes::Only(&["class"]), &["class"], Children::Only(&[])),
        (_, "Param") => rule(
            Attributes::Only(&["name", "value", "valueType"]),
            &["name", "value"],
            Children::Only(&[]),
        ),
        (_, "Relation") => rule(
            Attributes::Only(&[
                "type",
                "of",
                "expressionGet",
                "expressionSet",
                "lengthType",
                "relative",
                "relativeTo",
            ]),
            &["type"],
            Children::Only(&[]),
        ),
        (_, "Fixup" | "Analyzer") => plugin_rule(&["class"]),
        (_, "Transformer") => rule(
            Attributes::Only(&["class"]),
            &["class"],
            Children::Only(&["Param", "Transformer"]),
        ),
        (_, "Hint") => rule(Attributes::Only(&["name", "value"]), &["name", "value"], Children::Only(&[])),
        (_, "Placement") => rule(Attributes::Only(&["after", "before"]), &[], Children::Only(&[])),
        (_, "Number") => rule(
            Attributes::Data(&["size", "signed", "endian"]),
            &[],
            Children::Leaf(&[]),
        ),
        (_, "String") => rule(
            Attributes::Data(&["type", "nullTerminated", "padCharacter", "tokens", "analyzer"]),
            &[],
            Children::Leaf(&[]),
        ),
        (_, "Blob") => rule(Attributes::Data(&[]), &[], Children::Leaf(&[])),
        (_, "Double") => rule(Attributes::Data(&["size", "endian"]), &[], Children::Leaf(&[])),
        (_, "Flags") => rule(Attributes::Data(&["size", "endian"]), &[], Children::Leaf(&["Flag"])),
        (_, "Flag") => rule(Attributes::Data(&["position", "size"]), &[], Children::Leaf(&[])),
        (_, "Padding") => rule(
            Attributes::Data(&["alignment", "alignedTo", "minSize"]),
            &[],
            Children::Leaf(&[]),
        ),
        (_, "Block" | "Choice") => rule(Attributes::Data(&["ref"]), &[], Children::Data(&[])),
        (_, tag) if registry.data_model_factory(tag).is_some() => {
            rule(Attributes::Data(&["ref"]), &[], Children::Data(&[]))
        }
        (_, tag) if registry.element_factory(tag).is_some() => {
            rule(Attributes::Any, &[], Children::Data(&[]))
        }
        _ => return None,
    };
    Some(found)
}

fn root_rule() -> Rule {
    rule(
        Attributes::Only(&["version", "author", "description"]),
        &[],
        Children::Models(&[
            "Include",
            "Import",
            "PythonPath",
            "Defaults",
            "Data",
            "StateModel",
            "Agent",
            "Test",
        ]),
    )
}

/// Check `doc` against the rule table.
///
/// `origin` names the document in the error.
pub fn validate(doc: &Document<'_>, registry: &Registry, origin: Option<&str>) -> Result<()> {
    let mut violations = Vec::new();
    let root = doc.root_element();
    check(root, root_rule(), registry, &mut violations);

    if violations.is_empty() {
        return Ok(());
    }
    tracing::debug!(count = violations.len(), "Schema validation failed");
    Err(CompileError::Schema {
        origin: origin.map(str::to_string),
        violations,
    })
}

fn check(node: Node<'_, '_>, rule: Rule, registry: &Registry, out: &mut Vec<SchemaViolation>) {
    let tag = get_tag_name(node);
    let (line, column) = position(node);
    let mut report = |message: String| {
        out.push(SchemaViolation {
            line,
            column,
            message,
        });
    };

    for attribute in node.attributes() {
        // xsi:schemaLocation and friends.
        if attribute.namespace().is_some() {
            continue;
        }
        let name = attribute.name();
        let allowed = match rule.attributes {
            Attributes::Only(names) => names.contains(&name),
            Attributes::Data(names) => DATA_ATTRIBUTES.contains(&name) || names.contains(&name),
            Attributes::Any => true,
        };
        if !allowed {
            report(format!("The '{name}' attribute is not declared."));
        }
    }
    for required in rule.required {
        if !node.has_attribute(*required) {
            report(format!("The required attribute '{required}' is missing."));
        }
    }

    if matches!(rule.children, Children::Unchecked) {
        return;
    }
    for child in element_children(node) {
        let child_tag = get_tag_name(child);
        if !accepts(rule.children, registry, child_tag) {
            let (line, column) = position(child);
            out.push(SchemaViolation {
                line,
                column,
                message: format!("The element '{tag}' has invalid child element '{child_tag}'."),
            });
            continue;
        }
        match lookup(registry, tag, child_tag) {
            Some(child_rule) => check(child, child_rule, registry, out),
            None => {
                let (line, column) = position(child);
                out.push(SchemaViolation {
                    line,
                    column,
                    message: format!("The '{child_tag}' element is not declared."),
                });
            }
        }
    }
}

fn accepts(children: Children, registry: &Registry, tag: &str) -> bool {
    match children {
        Children::Only(tags) => tags.contains(&tag),
        Children::Data(extra) => {
            registry.element_factory(tag).is_some()
                || registry.is_common_child(tag)
                || extra.contains(&tag)
        }
        Children::Leaf(extra) => registry.is_common_child(tag) || extra.contains(&tag),
        Children::Models(extra) => {
            registry.data_model_factory(tag).is_some() || extra.contains(&tag)
        }
        Children::Unchecked => true,
    }
}
