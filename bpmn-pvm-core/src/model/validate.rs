use super::dto::*;
use crate::bpmn::{HandlerRegistry, VariableCondition};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub rule: String,
    pub message: String,
}

impl ValidationError {
    fn new(rule: &str, message: String) -> Self {
        Self {
            rule: rule.to_string(),
            message,
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.rule, self.message)
    }
}

/// Validate a model before compilation. Returns all errors found.
pub fn validate_model(dto: &ProcessModelDto, handlers: &HandlerRegistry) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if dto.id.trim().is_empty() {
        errors.push(ValidationError::new("V0", "Process id must not be empty".to_string()));
    }

    // V1: ids are unique across the whole model, nested scopes included
    let mut seen = HashSet::new();
    for id in dto.all_node_ids() {
        if !seen.insert(id) {
            errors.push(ValidationError::new("V1", format!("Duplicate node id: {}", id)));
        }
    }
    let mut flow_ids = HashSet::new();
    collect_flow_ids(&dto.nodes, &dto.flows, &mut flow_ids, &mut errors);

    validate_scope(&dto.id, &dto.nodes, &dto.flows, handlers, &mut errors);
    errors
}

fn collect_flow_ids(
    nodes: &[NodeDto],
    flows: &[FlowDto],
    seen: &mut HashSet<String>,
    errors: &mut Vec<ValidationError>,
) {
    for flow in flows {
        let id = flow.flow_id();
        if !seen.insert(id.clone()) {
            errors.push(ValidationError::new("V1", format!("Duplicate flow id: {}", id)));
        }
    }
    for node in nodes {
        if let NodeDto::SubProcess { nodes, flows, .. } = node {
            collect_flow_ids(nodes, flows, seen, errors);
        }
    }
}

/// Rules V2..V8 for one scope, then recursion into nested sub-processes.
fn validate_scope(
    scope: &str,
    nodes: &[NodeDto],
    flows: &[FlowDto],
    handlers: &HandlerRegistry,
    errors: &mut Vec<ValidationError>,
) {
    let node_map: HashMap<&str, &NodeDto> = nodes.iter().map(|n| (n.id(), n)).collect();

    // V2: exactly one start event per scope
    let starts: Vec<&str> = nodes
        .iter()
        .filter(|n| matches!(n, NodeDto::StartEvent { .. }))
        .map(|n| n.id())
        .collect();
    if starts.len() != 1 {
        errors.push(ValidationError::new(
            "V2",
            format!("Scope {}: expected exactly one StartEvent, found {}", scope, starts.len()),
        ));
    }

    // V3: flows connect nodes of this scope
    for flow in flows {
        for (field, reference) in [("from", &flow.from), ("to", &flow.to)] {
            if !node_map.contains_key(reference.as_str()) {
                errors.push(ValidationError::new(
                    "V3",
                    format!(
                        "Flow {} references unknown node '{}' ({}) in scope {}",
                        flow.flow_id(),
                        reference,
                        field,
                        scope
                    ),
                ));
            }
        }
    }

    // V4: every node reachable from the start event
    if let [start] = starts.as_slice() {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let index: HashMap<&str, NodeIndex> = nodes
            .iter()
            .map(|n| (n.id(), graph.add_node(n.id())))
            .collect();
        for flow in flows {
            if let (Some(from), Some(to)) = (index.get(flow.from.as_str()), index.get(flow.to.as_str())) {
                graph.add_edge(*from, *to, ());
            }
        }
        let mut reached = HashSet::new();
        let mut dfs = Dfs::new(&graph, index[start]);
        while let Some(visited) = dfs.next(&graph) {
            reached.insert(visited);
        }
        for node in nodes {
            if !reached.contains(&index[node.id()]) {
                errors.push(ValidationError::new(
                    "V4",
                    format!("Node {} is not reachable from start event {}", node.id(), start),
                ));
            }
        }
    }

    for node in nodes {
        // V5: a gateway's default flow is one of its outgoing flows
        if let Some(default) = node.default_flow() {
            let outgoing = flows
                .iter()
                .any(|f| f.from == node.id() && f.flow_id() == default);
            if !outgoing {
                errors.push(ValidationError::new(
                    "V5",
                    format!("Gateway {}: default flow '{}' is not one of its outgoing flows", node.id(), default),
                ));
            }
        }

        match node {
            // V6: service task handlers are registered
            NodeDto::ServiceTask { id, handler } if !handlers.contains(handler) => {
                errors.push(ValidationError::new(
                    "V6",
                    format!("ServiceTask {}: no handler registered under '{}'", id, handler),
                ));
            }
            NodeDto::CallActivity { id, called_element, .. } if called_element.trim().is_empty() => {
                errors.push(ValidationError::new(
                    "V8",
                    format!("CallActivity {}: called element must not be empty", id),
                ));
            }
            NodeDto::SubProcess { id, nodes, flows } => {
                validate_scope(id, nodes, flows, handlers, errors);
            }
            _ => {}
        }
    }

    // V7: conditions parse
    for flow in flows {
        if let Some(condition) = &flow.condition {
            if VariableCondition::parse(condition).is_err() {
                errors.push(ValidationError::new(
                    "V7",
                    format!("Flow {}: invalid condition '{}'", flow.flow_id(), condition),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::yaml::parse_model_yaml;
    use crate::runtime::Variables;

    fn rules(errors: &[ValidationError]) -> Vec<&str> {
        errors.iter().map(|e| e.rule.as_str()).collect()
    }

    #[test]
    fn test_valid_model_has_no_errors() {
        let dto = parse_model_yaml(
            r#"
id: ok
nodes:
  - { kind: StartEvent, id: start }
  - { kind: ExclusiveGateway, id: gw, default: gw-end }
  - { kind: ServiceTask, id: bill, handler: billing }
  - { kind: EndEvent, id: end }
flows:
  - { from: start, to: gw }
  - { from: gw, to: bill, condition: "${amount > 10}" }
  - { id: gw-end, from: gw, to: end }
  - { from: bill, to: end }
"#,
        )
        .unwrap();
        let mut handlers = HandlerRegistry::new();
        handlers.register("billing", |_: &Variables| -> anyhow::Result<Variables> {
            Ok(Variables::new())
        });
        assert!(validate_model(&dto, &handlers).is_empty());
    }

    #[test]
    fn test_all_violations_are_reported() {
        let dto = parse_model_yaml(
            r#"
id: broken
nodes:
  - { kind: StartEvent, id: start }
  - { kind: StartEvent, id: start2 }
  - { kind: ExclusiveGateway, id: gw, default: nowhere }
  - { kind: ServiceTask, id: bill, handler: missing }
  - { kind: EndEvent, id: end }
  - { kind: EndEvent, id: end }
flows:
  - { from: start, to: gw }
  - { from: gw, to: ghost, condition: "${amount >}" }
"#,
        )
        .unwrap();
        let errors = validate_model(&dto, &HandlerRegistry::new());
        let rules = rules(&errors);
        for rule in ["V1", "V2", "V3", "V5", "V6", "V7"] {
            assert!(rules.contains(&rule), "missing {rule} in {errors:?}");
        }
    }

    #[test]
    fn test_unreachable_nodes_inside_sub_process() {
        let dto = parse_model_yaml(
            r#"
id: nested
nodes:
  - { kind: StartEvent, id: start }
  - kind: SubProcess
    id: sub
    nodes:
      - { kind: StartEvent, id: sub_start }
      - { kind: UserTask, id: orphan }
  - { kind: EndEvent, id: end }
flows:
  - { from: start, to: sub }
  - { from: sub, to: end }
"#,
        )
        .unwrap();
        let errors = validate_model(&dto, &HandlerRegistry::new());
        assert_eq!(rules(&errors), vec!["V4"]);
        assert!(errors[0].message.contains("orphan"));
    }
}
