//! `<Data>` dataset construction.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use roxmltree::Node;
use walkdir::WalkDir;

use crate::coercion::{self, ValueKind};
use crate::config::CompileOptions;
use crate::dom::{
    DataElement, DataOption, DataSet, Dom, ElementKind, Field, FieldSelector, StringEncoding,
    StringSpec, Variant,
};
use crate::error::{CompileError, Result};
use crate::expression::{EvalScope, ExpressionEvaluator};
use crate::xml::{find_children, required_attr};

/// Builds datasets for top-level `<Data>` and action `<Data>` elements.
pub struct DatasetBuilder<'c> {
    dom: &'c Dom,
    options: &'c CompileOptions,
    evaluator: &'c dyn ExpressionEvaluator,
}

impl<'c> DatasetBuilder<'c> {
    #[must_use]
    pub fn new(
        dom: &'c Dom,
        options: &'c CompileOptions,
        evaluator: &'c dyn ExpressionEvaluator,
    ) -> Self {
        Self {
            dom,
            options,
            evaluator,
        }
    }

    /// Build the dataset described by `node`.
    ///
    /// `unique_name` is used when the node carries no `name`.
    pub fn build(&self, node: Node<'_, '_>, unique_name: &str) -> Result<DataSet> {
        let mut dataset = match node.attribute("ref") {
            Some(reference) => self.dom.find_data(reference).cloned().ok_or_else(|| {
                CompileError::unresolved("Data", reference, Some("<Data ref>".to_string()))
            })?,
            None => DataSet::new(unique_name),
        };
        dataset.name = node.attribute("name").unwrap_or(unique_name).to_string();
        dataset.field_id = node.attribute("fieldId").map(str::to_string);

        if let Some(file_name) = node.attribute("fileName") {
            dataset.options.clear();
            for path in self.files(&dataset.name, file_name)? {
                dataset.options.push(DataOption::File { path });
            }
        }

        let fields: Vec<_> = find_children(node, "Field").collect();
        if !fields.is_empty() {
            self.apply_fields(&mut dataset, &fields)?;
        }

        for mask in find_children(node, "FieldMask") {
            let selector = required_attr(mask, "select")?;
            if let Some((_, masks)) = fields_option(&mut dataset) {
                masks.push(selector.to_string());
            }
        }

        if dataset.options.is_empty() {
            return Err(CompileError::Dataset {
                name: dataset.name,
                reason: "is missing required 'fileName' attribute or <Field> child element"
                    .to_string(),
            });
        }

        tracing::debug!(data = %dataset.name, options = dataset.options.len(), "Built dataset");
        Ok(dataset)
    }

    /// Expand `fileName` into the sample files it names.
    fn files(&self, name: &str, file_name: &str) -> Result<Vec<PathBuf>> {
        let error = |reason: String| CompileError::Dataset {
            name: name.to_string(),
            reason,
        };

        if file_name.contains('*') {
            let pattern = self.options.resolve_path(file_name);
            let pattern = pattern.to_string_lossy();
            let entries = glob::glob(&pattern)
                .map_err(|e| error(format!("fileName '{file_name}' is not a valid pattern: {e}")))?;
            let mut files: Vec<PathBuf> = entries
                .filter_map(std::result::Result::ok)
                .filter(|path| path.is_file())
                .collect();
            files.sort();
            if files.is_empty() {
                return Err(error(format!("has no files matching '{file_name}'")));
            }
            return Ok(files);
        }

        let path = self.options.resolve_path(file_name);
        if path.is_dir() {
            let files = list_directory(&path);
            if files.is_empty() {
                return Err(error(format!("folder '{file_name}' contains no files")));
            }
            Ok(files)
        } else if path.is_file() {
            Ok(vec![path])
        } else {
            Err(error(format!("file or folder '{file_name}' does not exist")))
        }
    }

    fn apply_fields(&self, dataset: &mut DataSet, nodes: &[Node<'_, '_>]) -> Result<()> {
        // Fields replace any sample files taken over from a ref.
        if dataset
            .options
            .iter()
            .any(|option| matches!(option, DataOption::File { .. }))
        {
            dataset.options.clear();
        }

        let mut seen = HashSet::new();
        for node in nodes {
            let (selector, target) = match (node.attribute("name"), node.attribute("xpath")) {
                (_, Some(xpath)) => (FieldSelector::Xpath, xpath),
                (Some(name), None) => (FieldSelector::Name, name),
                (None, None) => return Err(CompileError::missing_attribute("Field", "name")),
            };
            if !seen.insert(target) {
                return Err(CompileError::Dataset {
                    name: dataset.name.clone(),
                    reason: format!("has multiple entries for field '{target}'"),
                });
            }

            let value = self.field_value(*node, target)?;
            if let Some((fields, _)) = fields_option(dataset) {
                fields.retain(|field| field.target != target);
                fields.push(Field {
                    selector,
                    target: target.to_string(),
                    value,
                });
            }
        }
        Ok(())
    }

    /// Coerce a `<Field>` value the way a String (or, for non-string value
    /// types, a Blob) element would.
    fn field_value(&self, node: Node<'_, '_>, target: &str) -> Result<Variant> {
        let label = format!("Field '{target}'");
        let value_type = node.attribute("valueType").unwrap_or("string");
        let kind = ValueKind::parse(value_type).ok_or_else(|| {
            CompileError::invalid_attribute(&label, "valueType", value_type, "invalid value type")
        })?;
        let element = if kind == ValueKind::String {
            DataElement::new(
                &label,
                ElementKind::String(StringSpec {
                    encoding: StringEncoding::Utf8,
                    null_terminated: false,
                    pad_character: '\0',
                }),
            )
        } else {
            DataElement::new(&label, ElementKind::Blob)
        };

        let Some(raw) = node.attribute("value") else {
            return Ok(match kind {
                ValueKind::String => Variant::String(String::new()),
                _ => Variant::Bytes(Vec::new()),
            });
        };
        let scope = EvalScope {
            element: Some(&element),
            node: Some(node),
            document: Some(self.dom),
            ..EvalScope::default()
        };
        coercion::coerce(raw, kind, self.evaluator, &scope)
            .and_then(|value| coercion::sanitize(&element, value))
            .map_err(|reason| CompileError::coercion(label, reason))
    }
}

/// The dataset's field option, created if missing.
fn fields_option(dataset: &mut DataSet) -> Option<(&mut Vec<Field>, &mut Vec<String>)> {
    if !dataset
        .options
        .iter()
        .any(|option| matches!(option, DataOption::Fields { .. }))
    {
        dataset.options.push(DataOption::Fields {
            fields: Vec::new(),
            masks: Vec::new(),
        });
    }
    dataset.options.iter_mut().find_map(|option| match option {
        DataOption::Fields { fields, masks } => Some((fields, masks)),
        DataOption::File { .. } => None,
    })
}

fn list_directory(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .collect();
    files.sort();
    files
}
