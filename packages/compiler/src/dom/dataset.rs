//! Datasets: sample files and field overrides fed into data models.

use std::path::PathBuf;

use serde::Serialize;

use super::collection::Named;
use super::value::Variant;

/// How a `<Field>` selects its target element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldSelector {
    Name,
    Xpath,
}

/// A value override for one element.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub selector: FieldSelector,
    /// Element name or xpath expression.
    pub target: String,
    pub value: Variant,
}

/// One alternative the engine may load into the data model.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum DataOption {
    /// A sample file cracked into the model.
    File { path: PathBuf },
    /// Field values and masks applied to the model's defaults.
    Fields { fields: Vec<Field>, masks: Vec<String> },
}

/// A named `<Data>` element.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataSet {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_id: Option<String>,
    pub options: Vec<DataOption>,
}

impl DataSet {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_id: None,
            options: Vec::new(),
        }
    }

    /// Sample files of this dataset.
    pub fn files(&self) -> impl Iterator<Item = &PathBuf> {
        self.options.iter().filter_map(|option| match option {
            DataOption::File { path } => Some(path),
            DataOption::Fields { .. } => None,
        })
    }
}

impl Named for DataSet {
    const KIND: &'static str = "Data";

    fn name(&self) -> &str {
        &self.name
    }
}
