//! Scripting collaborator for `<Import>` and `<PythonPath>`.

use std::collections::BTreeSet;

use thiserror::Error;

/// Failure reported by a [`ScriptHost`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    /// The module is already provided by the host (e.g. a plugins folder).
    #[error("module '{0}' is already loaded")]
    AlreadyLoaded(String),
    #[error("failed to import '{module}': {message}")]
    Failed { module: String, message: String },
}

/// Receives script search paths and module imports.
pub trait ScriptHost: Send {
    fn add_search_path(&mut self, path: &str) -> Result<(), ScriptError>;
    fn import_module(&mut self, module: &str) -> Result<(), ScriptError>;
}

/// Records paths and imports without running anything.
#[derive(Debug, Clone, Default)]
pub struct DefaultScriptHost {
    preloaded: BTreeSet<String>,
    search_paths: Vec<String>,
    imported: BTreeSet<String>,
}

impl DefaultScriptHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Host that reports `modules` as already loaded.
    #[must_use]
    pub fn with_preloaded(modules: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            preloaded: modules.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn search_paths(&self) -> &[String] {
        &self.search_paths
    }

    pub fn imported(&self) -> impl Iterator<Item = &str> {
        self.imported.iter().map(String::as_str)
    }
}

fn is_module_name(module: &str) -> bool {
    !module.is_empty()
        && module.split('.').all(|part| {
            let mut chars = part.chars();
            chars
                .next()
                .is_some_and(|c| c.is_alphabetic() || c == '_')
                && chars.all(|c| c.is_alphanumeric() || c == '_')
        })
}

impl ScriptHost for DefaultScriptHost {
    fn add_search_path(&mut self, path: &str) -> Result<(), ScriptError> {
        if !self.search_paths.iter().any(|p| p == path) {
            self.search_paths.push(path.to_string());
        }
        Ok(())
    }

    fn import_module(&mut self, module: &str) -> Result<(), ScriptError> {
        if self.preloaded.contains(module) {
            return Err(ScriptError::AlreadyLoaded(module.to_string()));
        }
        if !is_module_name(module) {
            return Err(ScriptError::Failed {
                module: module.to_string(),
                message: "not a valid module name".to_string(),
            });
        }
        self.imported.insert(module.to_string());
        Ok(())
    }
}
