//! Configuration constants and compile options.

use std::path::{Path, PathBuf};

/// Namespace URI of current Peach pit files.
pub const PEACH_NAMESPACE: &str = "http://peachfuzzer.com/2012/Peach";

/// Marker identifying the Peach 2.3 namespace (`http://phed.org/2008/Peach`).
pub const LEGACY_NAMESPACE_MARKER: &str = "2008";

/// Name of the required document root element.
pub const ROOT_ELEMENT: &str = "Peach";

/// Maximum nesting of `<Include>` directives.
///
/// A pit that includes itself would otherwise recurse until the stack
/// runs out.
pub const MAX_INCLUDE_DEPTH: usize = 32;

/// Upper bound on elements produced by a single array expansion.
pub const MAX_ARRAY_EXPANSION: u64 = 10_000;

/// Upper bound, in bytes, on a default value padded out to its declared
/// `length`.
pub const MAX_DEFAULT_LENGTH: u64 = 16 * 1024 * 1024;

/// Prefix for data elements that carry no `name` attribute.
pub const AUTO_NAME_PREFIX: &str = "DataElement";

/// Prefix used to strip URL-style include sources.
pub const FILE_URL_PREFIX: &str = "file:";

/// Default agent location.
pub const DEFAULT_AGENT_LOCATION: &str = "local://";

/// Per-compiler options.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Directory that relative include and dataset paths are resolved against.
    pub base_dir: PathBuf,
    /// Maximum `<Include>` nesting.
    pub max_include_depth: usize,
    /// Run the structural schema check before the semantic passes.
    pub validate_schema: bool,
}

impl CompileOptions {
    /// Options rooted at the current directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative paths against `dir`.
    #[must_use]
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_max_include_depth(mut self, depth: usize) -> Self {
        self.max_include_depth = depth;
        self
    }

    #[must_use]
    pub fn with_schema_validation(mut self, enabled: bool) -> Self {
        self.validate_schema = enabled;
        self
    }

    /// Resolve `path` against the base directory unless it is absolute.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            max_include_depth: MAX_INCLUDE_DEPTH,
            validate_schema: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_are_sane() {
        assert!(MAX_INCLUDE_DEPTH >= 4);
        assert!(MAX_ARRAY_EXPANSION >= 1_000);
        assert!(PEACH_NAMESPACE.contains("2012"));
        assert!(!PEACH_NAMESPACE.contains(LEGACY_NAMESPACE_MARKER));
    }

    #[test]
    fn test_resolve_path_relative_and_absolute() {
        let options = CompileOptions::new().with_base_dir("/pits");
        assert_eq!(options.resolve_path("a/b.xml"), PathBuf::from("/pits/a/b.xml"));
        assert_eq!(options.resolve_path("/abs.xml"), PathBuf::from("/abs.xml"));
    }

    #[test]
    fn test_builder_methods() {
        let options = CompileOptions::new()
            .with_max_include_depth(2)
            .with_schema_validation(false);
        assert_eq!(options.max_include_depth, 2);
        assert!(!options.validate_schema);
    }
}
