//! Error types for the PIT compiler.
//!
//! Every compile step returns `Result<T>`; the first error aborts the
//! whole compile. Schema validation is the one place where violations are
//! collected and raised together.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::plugin::PluginKind;

/// Category of a non-fatal finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DiagnosticKind {
    /// A plugin parameter that was renamed or dropped.
    ObsoleteParameter,
    /// An attribute in `<Defaults>` that no element kind consults.
    IgnoredDefault,
}

/// A non-fatal finding reported alongside a successful compile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// A single structural violation found during schema validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Line: {}, Position: {} - {}",
            self.line, self.column, self.message
        )
    }
}

/// What went wrong with a plugin's parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterProblem {
    Missing(String),
    Unknown(String),
}

impl fmt::Display for ParameterProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(name) => write!(f, "is missing required parameter '{name}'"),
            Self::Unknown(name) => write!(f, "has unknown parameter '{name}'"),
        }
    }
}

/// Main error type for the compiler library.
#[derive(Debug, Error)]
pub enum CompileError {
    /// The document is not well-formed XML.
    #[error("XML failed to load: {0}")]
    Xml(#[from] roxmltree::Error),

    /// The document failed structural validation.
    #[error(
        "Pit file{} failed to validate:\n{}",
        .origin.as_ref().map(|o| format!(" \"{o}\"")).unwrap_or_default(),
        .violations.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n")
    )]
    Schema {
        origin: Option<String>,
        violations: Vec<SchemaViolation>,
    },

    /// The document uses the Peach 2.3 namespace.
    #[error("Peach 2.3 namespace detected, please upgrade the pit")]
    LegacyNamespace,

    /// The root element is not `<Peach>`.
    #[error("expected root element <Peach>, found <{0}>")]
    InvalidRoot(String),

    /// No factory or handler exists for an element.
    #[error("found unknown {kind} element <{tag}>{}", .context.as_ref().map(|c| format!(" in {c}")).unwrap_or_default())]
    UnknownElement {
        kind: &'static str,
        tag: String,
        context: Option<String>,
    },

    /// An attribute that the compiler refuses to honour.
    #[error("attribute '{attribute}' on <{element}> is not supported: {reason}")]
    UnsupportedAttribute {
        element: String,
        attribute: String,
        reason: String,
    },

    /// An attribute carries a value outside its domain.
    #[error("invalid value '{value}' for attribute '{attribute}' on '{element}': {reason}")]
    InvalidAttribute {
        element: String,
        attribute: String,
        value: String,
        reason: String,
    },

    /// A required attribute was not given.
    #[error("<{element}> is missing required attribute '{attribute}'")]
    MissingAttribute { element: String, attribute: String },

    /// Two items with the same name in one named collection.
    #[error("a <{kind}> element named '{name}' already exists{}", .scope.as_ref().map(|s| format!(" in '{s}'")).unwrap_or_default())]
    DuplicateName {
        kind: String,
        name: String,
        scope: Option<String>,
    },

    /// A name-based reference that did not resolve.
    #[error("could not resolve {kind} '{name}'{}", .context.as_ref().map(|c| format!(" for {c}")).unwrap_or_default())]
    Unresolved {
        kind: String,
        name: String,
        context: Option<String>,
    },

    /// A `value`/`valueType` pair that could not be coerced.
    #[error("invalid value on element '{element}': {reason}")]
    Coercion { element: String, reason: String },

    /// An element carries a second fixup, transformer or analyzer.
    #[error("multiple {what} defined on element '{element}'")]
    MultiplePlugins { what: &'static str, element: String },

    /// A state model action breaks its kind's attribute rules.
    #[error("action '{action}' {reason}")]
    InvalidAction { action: String, reason: String },

    /// A `<Test>` is missing required parts or references unknown ones.
    #[error("test '{test}' {reason}")]
    InvalidTest { test: String, reason: String },

    /// A `class` that names no plugin of the requested kind.
    #[error("unable to locate {kind} '{class}'")]
    PluginNotFound { kind: PluginKind, class: String },

    /// Missing required or unknown plugin parameters.
    #[error("{kind} '{class}' {problem}.\n{usage}")]
    PluginParameter {
        kind: PluginKind,
        class: String,
        problem: ParameterProblem,
        usage: String,
    },

    /// The plugin's own constructor rejected its parameters.
    #[error("unable to create instance of '{kind}' named '{class}'.\nExtended error: {message}")]
    PluginConstruction {
        kind: PluginKind,
        class: String,
        message: String,
    },

    /// A script module was already loaded by the host.
    #[error("failed to import python module '{0}' because it was already loaded from the plugins folder. Remove <Import import=\"{0}\" /> from your pit and try again")]
    ScriptAlreadyLoaded(String),

    /// Generic scripting failure.
    #[error("script error for '{target}': {message}")]
    Script { target: String, message: String },

    /// An included pit failed to compile.
    #[error("failed to include '{path}': {source}")]
    Include {
        path: String,
        #[source]
        source: Box<CompileError>,
    },

    /// Nested includes went deeper than the configured limit.
    #[error("include depth limit of {0} exceeded")]
    IncludeDepth(usize),

    /// A defines file is malformed.
    #[error("defines file '{}' {reason}", .path.display())]
    Defines { path: PathBuf, reason: String },

    /// A `<Data>` element could not be assembled.
    #[error("<Data> element '{name}' {reason}")]
    Dataset { name: String, reason: String },

    /// Default output could not be produced for an element.
    #[error("cannot render '{element}': {reason}")]
    Render { element: String, reason: String },

    /// Some of the pits given to `pitc validate` failed.
    #[error("{failed} of {total} pit files failed to validate")]
    ValidationFailed { failed: usize, total: usize },

    /// IO error with the file it concerns.
    #[error("IO error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error.
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization error.
    #[error("YAML serialization failed: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl CompileError {
    /// Shorthand for [`CompileError::InvalidAttribute`].
    pub fn invalid_attribute(
        element: impl Into<String>,
        attribute: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidAttribute {
            element: element.into(),
            attribute: attribute.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`CompileError::MissingAttribute`].
    pub fn missing_attribute(element: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::MissingAttribute {
            element: element.into(),
            attribute: attribute.into(),
        }
    }

    /// Shorthand for [`CompileError::Unresolved`].
    pub fn unresolved(
        kind: impl Into<String>,
        name: impl Into<String>,
        context: Option<String>,
    ) -> Self {
        Self::Unresolved {
            kind: kind.into(),
            name: name.into(),
            context,
        }
    }

    /// Shorthand for [`CompileError::Coercion`].
    pub fn coercion(element: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Coercion {
            element: element.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for compiler operations.
pub type Result<T> = std::result::Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_error_lists_every_violation() {
        let err = CompileError::Schema {
            origin: Some("http.xml".to_string()),
            violations: vec![
                SchemaViolation {
                    line: 3,
                    column: 5,
                    message: "The required attribute 'name' is missing.".to_string(),
                },
                SchemaViolation {
                    line: 9,
                    column: 1,
                    message: "The 'foo' attribute is not declared.".to_string(),
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "Pit file \"http.xml\" failed to validate:\n\
             Line: 3, Position: 5 - The required attribute 'name' is missing.\n\
             Line: 9, Position: 1 - The 'foo' attribute is not declared."
        );
    }

    #[test]
    fn test_schema_error_without_origin() {
        let err = CompileError::Schema {
            origin: None,
            violations: vec![],
        };
        assert_eq!(err.to_string(), "Pit file failed to validate:\n");
    }

    #[test]
    fn test_duplicate_name_with_scope() {
        let err = CompileError::DuplicateName {
            kind: "Monitor".to_string(),
            name: "mon".to_string(),
            scope: Some("agent1".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "a <Monitor> element named 'mon' already exists in 'agent1'"
        );
    }

    #[test]
    fn test_unknown_element_with_context() {
        let err = CompileError::UnknownElement {
            kind: "data",
            tag: "Foo".to_string(),
            context: Some("<Block>".to_string()),
        };
        assert_eq!(err.to_string(), "found unknown data element <Foo> in <Block>");
    }

    #[test]
    fn test_plugin_parameter_message() {
        let err = CompileError::PluginParameter {
            kind: PluginKind::Publisher,
            class: "Tcp".to_string(),
            problem: ParameterProblem::Missing("Host".to_string()),
            usage: "Supported Parameters:".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "publisher 'Tcp' is missing required parameter 'Host'.\nSupported Parameters:"
        );
    }

    #[test]
    fn test_already_loaded_is_actionable() {
        let err = CompileError::ScriptAlreadyLoaded("mymod".to_string());
        assert!(err.to_string().contains("<Import import=\"mymod\" />"));
    }
}
