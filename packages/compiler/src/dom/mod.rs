//! The compiled model ("Dom") handed to the fuzzing engine.
//!
//! A [`Dom`] owns uniquely named, ordered collections of data models, state
//! models, agents, tests and datasets, plus the documents pulled in through
//! `<Include>` as namespaces.

mod collection;
mod dataset;
mod element;
mod state;
mod value;

use std::collections::BTreeMap;

use serde::Serialize;

pub use collection::{Named, NamedCollection};
pub use dataset::{DataOption, DataSet, Field, FieldSelector};
pub use element::{
    ArraySpec, ChoiceSpec, Container, DataElement, DataModel, DoubleSpec, ElementKind,
    ElementKindTag, ElementPath, Endian, FlagSpec, FlagsSpec, LengthType, NumberSpec,
    PaddingSpec, Placement, PlacementKind, Relation, RelationKind, StringEncoding, StringSpec,
    TransformerChain,
};
pub use state::{
    Action, ActionData, ActionKind, ActionParameter, ParameterDirection, State, StateModel,
};
pub use test::{
    Agent, FilterMode, Monitor, MutableRule, MutatorFilter, Platform, Publisher, PublisherKind,
    TargetLifetime, Test, Weight, DEFAULT_FAULT_WAIT_TIME, DEFAULT_MAX_BACK_SEARCH,
    DEFAULT_MAX_OUTPUT_SIZE,
};
pub use value::Variant;

/// A document pulled in through `<Include ns="...">`.
#[derive(Debug, Clone, Serialize)]
pub struct Namespace {
    pub name: String,
    pub dom: Dom,
}

impl Named for Namespace {
    const KIND: &'static str = "Include";

    fn name(&self) -> &str {
        &self.name
    }
}

/// Root of one compiled document.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Dom {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub data_models: NamedCollection<DataModel>,
    pub datas: NamedCollection<DataSet>,
    pub state_models: NamedCollection<StateModel>,
    pub agents: NamedCollection<Agent>,
    pub tests: NamedCollection<Test>,
    #[serde(skip_serializing_if = "NamedCollection::is_empty")]
    pub namespaces: NamedCollection<Namespace>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub python_paths: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub python_modules: Vec<String>,
    /// Free-form data attached by derived compilers.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl Dom {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Look up `name` or `ns:name` in one of the Dom's collections.
    ///
    /// Namespace prefixes may nest (`a:b:Name`).
    pub fn lookup<'a, T: Named>(
        &'a self,
        name: &str,
        collection: fn(&Dom) -> &NamedCollection<T>,
    ) -> Option<&'a T> {
        match name.split_once(':') {
            Some((ns, rest)) => self
                .namespaces
                .get(ns)
                .and_then(|namespace| namespace.dom.lookup(rest, collection)),
            None => collection(self).get(name),
        }
    }

    #[must_use]
    pub fn find_data_model(&self, name: &str) -> Option<&DataModel> {
        self.lookup(name, |dom| &dom.data_models)
    }

    #[must_use]
    pub fn find_state_model(&self, name: &str) -> Option<&StateModel> {
        self.lookup(name, |dom| &dom.state_models)
    }

    #[must_use]
    pub fn find_agent(&self, name: &str) -> Option<&Agent> {
        self.lookup(name, |dom| &dom.agents)
    }

    #[must_use]
    pub fn find_data(&self, name: &str) -> Option<&DataSet> {
        self.lookup(name, |dom| &dom.datas)
    }

    /// Resolve a data element reference.
    ///
    /// Accepts a model name (`Model`, `ns:Model`) or a dotted path into a
    /// model (`Model.block.field`).
    #[must_use]
    pub fn find_element(&self, name: &str) -> Option<&DataElement> {
        if let Some(model) = self.find_data_model(name) {
            return Some(&model.root);
        }
        let (model, path) = name.split_once('.')?;
        self.find_data_model(model)?.root.find(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(name: &str) -> DataModel {
        let mut children = Container::new();
        children
            .insert(DataElement::new("payload", ElementKind::Blob))
            .unwrap();
        DataModel::new(DataElement::new(name, ElementKind::Block(children)))
    }

    #[test]
    fn test_lookup_with_namespace() {
        let mut inner = Dom::new("inner");
        inner.data_models.insert(model("Shared")).unwrap();

        let mut dom = Dom::new("outer");
        dom.data_models.insert(model("Local")).unwrap();
        dom.namespaces
            .insert(Namespace {
                name: "lib".to_string(),
                dom: inner,
            })
            .unwrap();

        assert!(dom.find_data_model("Local").is_some());
        assert!(dom.find_data_model("lib:Shared").is_some());
        assert!(dom.find_data_model("Shared").is_none());
        assert!(dom.find_data_model("other:Shared").is_none());
    }

    #[test]
    fn test_find_element_dotted() {
        let mut dom = Dom::new("d");
        dom.data_models.insert(model("Packet")).unwrap();

        assert_eq!(dom.find_element("Packet").unwrap().name, "Packet");
        assert_eq!(dom.find_element("Packet.payload").unwrap().name, "payload");
        assert!(dom.find_element("Packet.nothing").is_none());
    }
}
