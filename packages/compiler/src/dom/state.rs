//! State models: the state machine the engine walks.

use std::collections::BTreeMap;

use serde::Serialize;

use super::collection::{Named, NamedCollection};
use super::dataset::DataSet;
use super::element::DataModel;

/// Declared kind of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionKind {
    Start,
    Stop,
    Open,
    Close,
    Accept,
    Connect,
    Input,
    Output,
    Call,
    ChangeState,
    Slurp,
    GetProperty,
    SetProperty,
}

impl ActionKind {
    /// Parse an action `type`, ignoring case.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let kind = match value.to_ascii_lowercase().as_str() {
            "start" => Self::Start,
            "stop" => Self::Stop,
            "open" => Self::Open,
            "close" => Self::Close,
            "accept" => Self::Accept,
            "connect" => Self::Connect,
            "input" => Self::Input,
            "output" => Self::Output,
            "call" => Self::Call,
            "changestate" => Self::ChangeState,
            "slurp" => Self::Slurp,
            "getproperty" => Self::GetProperty,
            "setproperty" => Self::SetProperty,
            _ => return None,
        };
        Some(kind)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Open => "open",
            Self::Close => "close",
            Self::Accept => "accept",
            Self::Connect => "connect",
            Self::Input => "input",
            Self::Output => "output",
            Self::Call => "call",
            Self::ChangeState => "changeState",
            Self::Slurp => "slurp",
            Self::GetProperty => "getProperty",
            Self::SetProperty => "setProperty",
        }
    }
}

/// Data model (plus optional datasets) attached to an action.
#[derive(Debug, Clone, Serialize)]
pub struct ActionData {
    pub model: DataModel,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub datasets: Vec<DataSet>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterDirection {
    In,
    Out,
    InOut,
}

impl ParameterDirection {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "in" => Some(Self::In),
            "out" => Some(Self::Out),
            "inout" => Some(Self::InOut),
            _ => None,
        }
    }
}

/// A `<Param>` of a `call` action.
#[derive(Debug, Clone, Serialize)]
pub struct ActionParameter {
    pub name: String,
    pub direction: ParameterDirection,
    pub data: ActionData,
}

impl Named for ActionParameter {
    const KIND: &'static str = "Param";

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Action {
    pub name: String,
    pub kind: ActionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_complete: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    /// Target state of a `changeState` action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_xpath: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_xpath: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ActionData>,
    #[serde(skip_serializing_if = "NamedCollection::is_empty")]
    pub parameters: NamedCollection<ActionParameter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ActionData>,
}

impl Action {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            name: name.into(),
            kind,
            field_id: None,
            when: None,
            publisher: None,
            on_start: None,
            on_complete: None,
            method: None,
            property: None,
            target_state: None,
            set_xpath: None,
            value_xpath: None,
            data: None,
            parameters: NamedCollection::new(),
            result: None,
        }
    }
}

impl Named for Action {
    const KIND: &'static str = "Action";

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct State {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_complete: Option<String>,
    pub actions: NamedCollection<Action>,
}

impl State {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_id: None,
            on_start: None,
            on_complete: None,
            actions: NamedCollection::new(),
        }
    }
}

impl Named for State {
    const KIND: &'static str = "State";

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StateModel {
    pub name: String,
    pub initial_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_state: Option<String>,
    pub states: NamedCollection<State>,
    /// Free-form data attached by derived compilers.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl StateModel {
    #[must_use]
    pub fn new(name: impl Into<String>, initial_state: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initial_state: initial_state.into(),
            final_state: None,
            states: NamedCollection::new(),
            extensions: BTreeMap::new(),
        }
    }

    /// All actions across states, with their state.
    pub fn actions(&self) -> impl Iterator<Item = (&State, &Action)> {
        self.states
            .iter()
            .flat_map(|state| state.actions.iter().map(move |action| (state, action)))
    }
}

impl Named for StateModel {
    const KIND: &'static str = "StateModel";

    fn name(&self) -> &str {
        &self.name
    }
}
