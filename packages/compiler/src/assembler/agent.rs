use roxmltree::Node;

use super::Assembler;
use crate::dom::{Agent, Monitor};
use crate::error::Result;
use crate::plugin::read_params;
use crate::xml::{find_children, required_attr};

impl Assembler<'_> {
    /// Build a top-level `<Agent>` and its monitors.
    pub fn build_agent(&mut self, node: Node<'_, '_>) -> Result<Agent> {
        let mut agent = Agent::new(required_attr(node, "name")?);
        if let Some(location) = node.attribute("location") {
            agent.location = location.to_string();
        }
        agent.password = node.attribute("password").map(str::to_string);

        for child in find_children(node, "Monitor") {
            let monitor = Monitor {
                name: child
                    .attribute("name")
                    .map_or_else(|| agent.monitors.unique_name("Monitor"), str::to_string),
                class: required_attr(child, "class")?.to_string(),
                params: read_params(child)?,
            };
            agent.monitors.insert_scoped(monitor, &agent.name)?;
        }

        tracing::debug!(agent = %agent.name, monitors = agent.monitors.len(), "Built agent");
        Ok(agent)
    }
}
