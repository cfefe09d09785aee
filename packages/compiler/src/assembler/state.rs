use roxmltree::Node;

use super::Assembler;
use crate::binder;
use crate::builder::DataElementBuilder;
use crate::dataset::DatasetBuilder;
use crate::dom::{
    Action, ActionData, ActionKind, ActionParameter, DataSet, NamedCollection,
    ParameterDirection, State, StateModel,
};
use crate::error::{CompileError, Result};
use crate::xml::{element_children, find_children, get_tag_name, required_attr};

/// Attributes that select what an action operates on. Each kind allows
/// only its own.
const TARGET_ATTRIBUTES: &[&str] = &["ref", "method", "property", "setXpath", "valueXpath"];

/// How an action kind uses `<DataModel>` and `<Data>` children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataRule {
    /// No action data.
    None,
    /// A data model the target fills in; `<Data>` is not allowed.
    Incoming,
    /// A data model sent to the target, optionally seeded from `<Data>`.
    Outgoing,
}

impl DataRule {
    fn allows_datasets(self) -> bool {
        self == Self::Outgoing
    }
}

struct ActionRules {
    required: &'static [&'static str],
    data: DataRule,
}

impl ActionRules {
    fn of(kind: ActionKind) -> Self {
        let (required, data): (&'static [&'static str], DataRule) = match kind {
            ActionKind::Start
            | ActionKind::Stop
            | ActionKind::Open
            | ActionKind::Close
            | ActionKind::Accept
            | ActionKind::Connect => (&[], DataRule::None),
            ActionKind::Input => (&[], DataRule::Incoming),
            ActionKind::Output => (&[], DataRule::Outgoing),
            ActionKind::Call => (&["method"], DataRule::None),
            ActionKind::ChangeState => (&["ref"], DataRule::None),
            ActionKind::Slurp => (&["setXpath", "valueXpath"], DataRule::None),
            ActionKind::GetProperty => (&["property"], DataRule::Incoming),
            ActionKind::SetProperty => (&["property"], DataRule::Outgoing),
        };
        Self { required, data }
    }

    fn forbids(&self, attribute: &str) -> bool {
        TARGET_ATTRIBUTES.contains(&attribute) && !self.required.contains(&attribute)
    }
}

impl Assembler<'_> {
    /// Build a top-level `<StateModel>`.
    ///
    /// The initial state, the final state and every `changeState` target
    /// must name a state of this model.
    pub fn build_state_model(&mut self, node: Node<'_, '_>) -> Result<StateModel> {
        let name = required_attr(node, "name")?;
        let initial_state = required_attr(node, "initialState")?;
        let mut model = self.hooks.create_state_model(name, initial_state);
        model.final_state = node.attribute("finalState").map(str::to_string);

        for child in find_children(node, "State") {
            let state = self.build_state(child, &model)?;
            model.states.insert_scoped(state, &model.name)?;
        }

        let context = || Some(format!("state model '{}'", model.name));
        if !model.states.contains(&model.initial_state) {
            return Err(CompileError::unresolved(
                "initial state",
                &model.initial_state,
                context(),
            ));
        }
        if let Some(final_state) = &model.final_state {
            if !model.states.contains(final_state) {
                return Err(CompileError::unresolved("final state", final_state, context()));
            }
        }
        for (state, action) in model.actions() {
            if let Some(target) = &action.target_state {
                if !model.states.contains(target) {
                    return Err(CompileError::unresolved(
                        "state",
                        target,
                        Some(format!("action '{}.{}.{}'", model.name, state.name, action.name)),
                    ));
                }
            }
        }

        tracing::debug!(
            state_model = %model.name,
            states = model.states.len(),
            "Built state model"
        );
        Ok(model)
    }

    fn build_state(&mut self, node: Node<'_, '_>, model: &StateModel) -> Result<State> {
        let name = node
            .attribute("name")
            .map_or_else(|| model.states.unique_name("State"), str::to_string);
        let mut state = State::new(name);
        state.field_id = node.attribute("fieldId").map(str::to_string);
        state.on_start = node.attribute("onStart").map(str::to_string);
        state.on_complete = node.attribute("onComplete").map(str::to_string);

        let owner = format!("{}.{}", model.name, state.name);
        for child in find_children(node, "Action") {
            let action = self.build_action(child, &owner, &state)?;
            state.actions.insert_scoped(action, &owner)?;
        }
        Ok(state)
    }

    fn build_action(&mut self, node: Node<'_, '_>, owner: &str, state: &State) -> Result<Action> {
        let type_attr = required_attr(node, "type")?;
        let kind = ActionKind::parse(type_attr).ok_or_else(|| {
            CompileError::invalid_attribute(
                format!("State '{}'", state.name),
                "type",
                type_attr,
                "invalid action type",
            )
        })?;
        let name = node
            .attribute("name")
            .map_or_else(|| state.actions.unique_name("Action"), str::to_string);
        let label = format!("{owner}.{name}");
        let invalid = |reason: String| CompileError::InvalidAction {
            action: label.clone(),
            reason,
        };

        let rules = ActionRules::of(kind);
        if let Some(attribute) = TARGET_ATTRIBUTES
            .iter()
            .find(|attribute| rules.forbids(attribute) && node.has_attribute(**attribute))
        {
            return Err(invalid(format!("has invalid attribute '{attribute}'")));
        }
        if let Some(attribute) = rules
            .required
            .iter()
            .find(|attribute| !node.has_attribute(**attribute))
        {
            return Err(invalid(format!("is missing required attribute '{attribute}'")));
        }

        let mut action = Action::new(name, kind);
        let text = |attribute: &str| node.attribute(attribute).map(str::to_string);
        action.field_id = text("fieldId");
        action.when = text("when");
        action.publisher = text("publisher");
        action.on_start = text("onStart");
        action.on_complete = text("onComplete");
        action.method = text("method");
        action.property = text("property");
        action.target_state = text("ref");
        action.set_xpath = text("setXpath");
        action.value_xpath = text("valueXpath");

        if rules.data != DataRule::None {
            action.data = Some(self.build_action_data(node, &label, None, rules.data)?);
        }

        if kind == ActionKind::Call {
            for child in element_children(node) {
                match get_tag_name(child) {
                    "Param" => {
                        let parameter = self.build_parameter(child, &label, &action)?;
                        action.parameters.insert_scoped(parameter, &label)?;
                    }
                    "Result" => {
                        action.result = Some(self.build_action_data(
                            child,
                            &label,
                            Some("Result"),
                            DataRule::Incoming,
                        )?);
                    }
                    _ => {}
                }
            }
        }

        tracing::trace!(action = %label, kind = kind.as_str(), "Built action");
        Ok(action)
    }

    fn build_parameter(
        &mut self,
        node: Node<'_, '_>,
        label: &str,
        action: &Action,
    ) -> Result<ActionParameter> {
        let type_attr = node.attribute("type").unwrap_or("in");
        let direction = ParameterDirection::parse(&type_attr.to_ascii_lowercase()).ok_or_else(|| {
            CompileError::InvalidAction {
                action: label.to_string(),
                reason: format!("has a <Param> child with invalid type '{type_attr}'"),
            }
        })?;
        let name = node
            .attribute("name")
            .map_or_else(|| action.parameters.unique_name("Param"), str::to_string);

        // Out parameters are filled by the target.
        let rule = if direction == ParameterDirection::Out {
            DataRule::Incoming
        } else {
            DataRule::Outgoing
        };
        let data = self.build_action_data(node, label, Some("Param"), rule)?;
        Ok(ActionParameter {
            name,
            direction,
            data,
        })
    }

    /// Build the data model (and, for outgoing data, the datasets) declared
    /// as children of `node`.
    ///
    /// `part` names the `<Param>`/`<Result>` child the data belongs to.
    fn build_action_data(
        &mut self,
        node: Node<'_, '_>,
        label: &str,
        part: Option<&str>,
        rule: DataRule,
    ) -> Result<ActionData> {
        let invalid = |problem: &str| CompileError::InvalidAction {
            action: label.to_string(),
            reason: match part {
                Some(part) => format!("has a <{part}> child with {problem}"),
                None => format!("has {problem}"),
            },
        };

        let mut model = None;
        let mut datasets: NamedCollection<DataSet> = NamedCollection::new();
        for child in element_children(node) {
            let tag = get_tag_name(child);
            if self.registry.data_model_factory(tag).is_some() {
                if model.is_some() {
                    return Err(invalid("more than one <DataModel> child element"));
                }
                let mut built =
                    DataElementBuilder::new(self.registry, self.dom, self.evaluator, &mut *self.session)
                        .build_data_model(child)?;
                binder::bind(&mut built)?;
                model = Some(built);
            } else if tag == "Data" {
                if !rule.allows_datasets() {
                    return Err(invalid("unsupported child element <Data>"));
                }
                let dataset = DatasetBuilder::new(self.dom, self.options, self.evaluator)
                    .build(child, &datasets.unique_name("Data"))?;
                datasets.insert_scoped(dataset, label)?;
            }
        }

        let model = model.ok_or_else(|| invalid("no <DataModel> child element"))?;
        Ok(ActionData {
            model,
            datasets: datasets.into_iter().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{dom_with_models, with_assembler};
    use crate::dom::{ActionKind, Dom, ParameterDirection, StateModel};
    use crate::error::{CompileError, Result};
    use crate::registry::Registry;
    use crate::session::CompileSession;
    use pretty_assertions::assert_eq;
    use roxmltree::Document;

    const MODELS: &str = r#"<Peach>
        <DataModel name="Request"><String name="verb" value="GET"/></DataModel>
        <DataModel name="Response"><Blob name="body"/></DataModel>
    </Peach>"#;

    fn state_model(xml: &str) -> Result<StateModel> {
        let registry = Registry::with_builtins();
        let dom = dom_with_models(&registry, MODELS);
        state_model_in(&registry, &dom, xml)
    }

    fn state_model_in(registry: &Registry, dom: &Dom, xml: &str) -> Result<StateModel> {
        let doc = Document::parse(xml).unwrap();
        let mut session = CompileSession::new();
        with_assembler(registry, dom, &mut session, |a| {
            a.build_state_model(doc.root_element())
        })
    }

    #[test]
    fn test_state_model_with_actions() {
        let model = state_model(
            r#"<StateModel name="sm" initialState="Initial" finalState="Done">
                <State name="Initial" onStart="setup()">
                    <Action type="output"><DataModel ref="Request"/></Action>
                    <Action name="recv" type="Input" publisher="tcp"><DataModel ref="Response"/></Action>
                    <Action type="ChangeState" ref="Done"/>
                </State>
                <State name="Done"><Action type="close"/></State>
            </StateModel>"#,
        )
        .unwrap();

        assert_eq!(model.initial_state, "Initial");
        assert_eq!(model.final_state.as_deref(), Some("Done"));
        let names: Vec<_> = model
            .actions()
            .map(|(s, a)| format!("{}.{}", s.name, a.name))
            .collect();
        assert_eq!(
            names,
            vec!["Initial.Action", "Initial.recv", "Initial.Action_1", "Done.Action"]
        );

        let initial = model.states.get("Initial").unwrap();
        assert_eq!(initial.on_start.as_deref(), Some("setup()"));
        let send = initial.actions.get("Action").unwrap();
        assert_eq!(send.kind, ActionKind::Output);
        let data = send.data.as_ref().unwrap();
        assert_eq!(data.model.root.name, "Request");
        assert!(data.model.root.find("verb").is_some());

        let recv = initial.actions.get("recv").unwrap();
        assert_eq!(recv.publisher.as_deref(), Some("tcp"));
        assert_eq!(
            initial.actions.get("Action_1").unwrap().target_state.as_deref(),
            Some("Done")
        );
    }

    #[test]
    fn test_inline_action_data_model_is_bound() {
        let model = state_model(
            r#"<StateModel name="sm" initialState="s">
                <State name="s">
                    <Action type="output">
                        <DataModel name="Inline">
                            <Number name="len" size="8"><Relation type="size" of="data"/></Number>
                            <Blob name="data"/>
                        </DataModel>
                        <Data><Field name="data" value="abc"/></Data>
                    </Action>
                </State>
            </StateModel>"#,
        )
        .unwrap();
        let action = model.states.get("s").unwrap().actions.get("Action").unwrap();
        let data = action.data.as_ref().unwrap();
        let len = data.model.root.find("len").unwrap();
        assert!(len.relations[0].target.is_some());
        assert_eq!(data.datasets.len(), 1);
        assert_eq!(data.datasets[0].name, "Data");
    }

    #[test]
    fn test_missing_initial_state_fails() {
        let err = state_model(r#"<StateModel name="sm" initialState="Nope"><State name="s"/></StateModel>"#)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "could not resolve initial state 'Nope' for state model 'sm'"
        );
    }

    #[test]
    fn test_missing_final_state_fails() {
        let err = state_model(
            r#"<StateModel name="sm" initialState="s" finalState="end"><State name="s"/></StateModel>"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("final state 'end'"));
    }

    #[test]
    fn test_change_state_target_must_exist() {
        let err = state_model(
            r#"<StateModel name="sm" initialState="s">
                <State name="s"><Action name="go" type="changeState" ref="elsewhere"/></State>
            </StateModel>"#,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "could not resolve state 'elsewhere' for action 'sm.s.go'"
        );
    }

    #[test]
    fn test_duplicate_state_and_action_fail() {
        let err = state_model(
            r#"<StateModel name="sm" initialState="s"><State name="s"/><State name="s"/></StateModel>"#,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "a <State> element named 's' already exists in 'sm'");

        let err = state_model(
            r#"<StateModel name="sm" initialState="s">
                <State name="s"><Action name="a" type="open"/><Action name="a" type="close"/></State>
            </StateModel>"#,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "a <Action> element named 'a' already exists in 'sm.s'");
    }

    #[test]
    fn test_action_attribute_rules() {
        let cases = [
            (r#"<Action name="a" type="output" method="m"><DataModel ref="Request"/></Action>"#,
             "action 'sm.s.a' has invalid attribute 'method'"),
            (r#"<Action name="a" type="call" property="p" method="m"/>"#,
             "action 'sm.s.a' has invalid attribute 'property'"),
            (r#"<Action name="a" type="slurp" setXpath="//x"/>"#,
             "action 'sm.s.a' is missing required attribute 'valueXpath'"),
            (r#"<Action name="a" type="changeState"/>"#,
             "action 'sm.s.a' is missing required attribute 'ref'"),
            (r#"<Action name="a" type="start" ref="s"/>"#,
             "action 'sm.s.a' has invalid attribute 'ref'"),
        ];
        for (action, expected) in cases {
            let xml = format!(
                r#"<StateModel name="sm" initialState="s"><State name="s">{action}</State></StateModel>"#
            );
            let err = state_model(&xml).unwrap_err();
            assert!(matches!(err, CompileError::InvalidAction { .. }), "{action}");
            assert_eq!(err.to_string(), expected);
        }
    }

    #[test]
    fn test_invalid_action_type_fails() {
        let err = state_model(
            r#"<StateModel name="sm" initialState="s"><State name="s"><Action type="explode"/></State></StateModel>"#,
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::InvalidAttribute { .. }));
    }

    #[test]
    fn test_action_data_rules() {
        let err = state_model(
            r#"<StateModel name="sm" initialState="s"><State name="s"><Action name="a" type="output"/></State></StateModel>"#,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "action 'sm.s.a' has no <DataModel> child element"
        );

        let err = state_model(
            r#"<StateModel name="sm" initialState="s"><State name="s">
                <Action name="a" type="input"><DataModel ref="Response"/><Data><Field name="body" value="x"/></Data></Action>
            </State></StateModel>"#,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "action 'sm.s.a' has unsupported child element <Data>"
        );
    }

    #[test]
    fn test_call_parameters_and_result() {
        let model = state_model(
            r#"<StateModel name="sm" initialState="s"><State name="s">
                <Action name="c" type="call" method="Login">
                    <Param name="user"><DataModel ref="Request"/><Data><Field name="verb" value="PUT"/></Data></Param>
                    <Param type="Out"><DataModel ref="Response"/></Param>
                    <Result><DataModel ref="Response"/></Result>
                </Action>
            </State></StateModel>"#,
        )
        .unwrap();
        let call = model.states.get("s").unwrap().actions.get("c").unwrap();
        assert_eq!(call.method.as_deref(), Some("Login"));
        assert_eq!(call.parameters.names().collect::<Vec<_>>(), vec!["user", "Param"]);
        assert_eq!(call.parameters.get("user").unwrap().direction, ParameterDirection::In);
        assert_eq!(call.parameters.get("Param").unwrap().direction, ParameterDirection::Out);
        assert_eq!(call.result.as_ref().unwrap().model.root.name, "Response");
    }

    #[test]
    fn test_out_parameter_rejects_data() {
        let err = state_model(
            r#"<StateModel name="sm" initialState="s"><State name="s">
                <Action name="c" type="call" method="m">
                    <Param type="out"><DataModel ref="Response"/><Data><Field name="body" value="x"/></Data></Param>
                </Action>
            </State></StateModel>"#,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "action 'sm.s.c' has a <Param> child with unsupported child element <Data>"
        );

        let err = state_model(
            r#"<StateModel name="sm" initialState="s"><State name="s">
                <Action name="c" type="call" method="m"><Param type="sideways"><DataModel ref="Response"/></Param></Action>
            </State></StateModel>"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid type 'sideways'"));
    }
}
