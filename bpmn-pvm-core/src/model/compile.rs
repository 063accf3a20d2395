use super::dto::*;
use super::validate::validate_model;
use crate::bpmn::{
    Automatic, CallActivity, EmbeddedSubProcess, ExclusiveGateway, HandlerRegistry, InclusiveGateway,
    NoneEndEvent, ParallelGateway, ServiceTask, TerminateEndEvent, UserTask, VariableCondition, WaitState,
    ASSIGNEE, CANDIDATE_GROUP, DEFAULT_FLOW,
};
use crate::definition::{ProcessDefinition, ProcessDefinitionBuilder};
use crate::error::DefinitionError;
use tracing::debug;

/// Validate `dto` and build a [`ProcessDefinition`] wired with the built-in behaviors.
pub fn compile_model(dto: &ProcessModelDto, handlers: &HandlerRegistry) -> Result<ProcessDefinition, DefinitionError> {
    let errors = validate_model(dto, handlers);
    if !errors.is_empty() {
        return Err(DefinitionError::Invalid(
            errors.iter().map(ToString::to_string).collect(),
        ));
    }

    let mut builder = ProcessDefinitionBuilder::new(&dto.id);
    if let Some(name) = &dto.name {
        builder = builder.name(name);
    }
    let builder = add_scope(builder, &dto.nodes, &dto.flows, handlers)?;
    let definition = builder.build()?;
    debug!(key = %dto.id, activities = definition.activities().count(), "compiled process model");
    Ok(definition)
}

fn add_scope(
    mut builder: ProcessDefinitionBuilder,
    nodes: &[NodeDto],
    flows: &[FlowDto],
    handlers: &HandlerRegistry,
) -> Result<ProcessDefinitionBuilder, DefinitionError> {
    for node in nodes {
        builder = builder.create_activity(node.id()).kind(node.kind_name());
        builder = match node {
            NodeDto::StartEvent { .. } => builder.initial().behavior(Automatic),
            NodeDto::EndEvent { terminate: true, .. } => builder.behavior(TerminateEndEvent),
            NodeDto::EndEvent { .. } => builder.behavior(NoneEndEvent),
            NodeDto::Task { .. } | NodeDto::ManualTask { .. } => builder.behavior(Automatic),
            NodeDto::ReceiveTask { .. } => builder.behavior(WaitState),
            NodeDto::UserTask {
                assignee,
                candidate_group,
                ..
            } => {
                let mut b = builder.behavior(UserTask {
                    assignee: assignee.clone(),
                    candidate_group: candidate_group.clone(),
                });
                if let Some(assignee) = assignee {
                    b = b.property(ASSIGNEE, assignee);
                }
                if let Some(group) = candidate_group {
                    b = b.property(CANDIDATE_GROUP, group);
                }
                b
            }
            NodeDto::ServiceTask { handler, .. } => builder
                .behavior(ServiceTask::from_registry(handlers, handler)?)
                .property("handler", handler),
            NodeDto::ExclusiveGateway { .. } => builder.behavior(ExclusiveGateway),
            NodeDto::ParallelGateway { .. } => builder.behavior(ParallelGateway),
            NodeDto::InclusiveGateway { .. } => builder.behavior(InclusiveGateway),
            NodeDto::SubProcess { nodes, flows, .. } => {
                let b = builder.scope().behavior(EmbeddedSubProcess);
                add_scope(b, nodes, flows, handlers)?
            }
            NodeDto::CallActivity {
                called_element,
                inputs,
                outputs,
                ..
            } => builder
                .behavior(CallActivity {
                    called_element: called_element.clone(),
                    inputs: inputs.clone(),
                    outputs: outputs.clone(),
                })
                .property("calledElement", called_element),
        };
        if let Some(default) = node.default_flow() {
            builder = builder.property(DEFAULT_FLOW, default);
        }

        for flow in flows.iter().filter(|f| f.from == node.id()) {
            builder = builder.transition_with_id(flow.flow_id(), &flow.to);
            if let Some(condition) = &flow.condition {
                builder = builder.condition(VariableCondition::parse(condition)?);
            }
        }
        builder = builder.end_activity();
    }
    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::yaml::parse_model_yaml;
    use crate::runtime::ExecutionTree;
    use serde_json::json;
    use std::sync::Arc;

    const APPROVAL: &str = r#"
id: approval
nodes:
  - { kind: StartEvent, id: start }
  - { kind: ExclusiveGateway, id: check, default: auto }
  - { kind: UserTask, id: review, assignee: kermit }
  - { kind: EndEvent, id: end }
flows:
  - { from: start, to: check }
  - { from: check, to: review, condition: "${amount >= 1000}" }
  - { id: auto, from: check, to: end }
  - { from: review, to: end }
"#;

    #[test]
    fn test_compiled_definition_shape() {
        let dto = parse_model_yaml(APPROVAL).unwrap();
        let def = compile_model(&dto, &HandlerRegistry::new()).unwrap();
        assert_eq!(def.id(), "approval:1");
        let check = def.find_activity("check").unwrap();
        assert_eq!(def.activity(check).kind(), "exclusiveGateway");
        assert_eq!(def.activity(check).property(DEFAULT_FLOW), Some("auto"));
        assert_eq!(def.activity(check).outgoing().len(), 2);
        let review = def.find_activity("review").unwrap();
        assert_eq!(def.activity(review).property(ASSIGNEE), Some("kermit"));
        assert!(def.find_transition("auto").is_some());
    }

    #[test]
    fn test_compiled_definition_routes_on_variables() {
        let def = Arc::new(compile_model(&parse_model_yaml(APPROVAL).unwrap(), &HandlerRegistry::new()).unwrap());

        let mut tree = ExecutionTree::new();
        let small = tree.create_process_instance(def.clone(), None);
        tree.set_variable(small, "amount", json!(10)).unwrap();
        tree.start(small).unwrap();
        assert!(tree.node(small).unwrap().is_ended());

        let large = tree.create_process_instance(def, None);
        tree.set_variable(large, "amount", json!(5000)).unwrap();
        tree.start(large).unwrap();
        assert_eq!(tree.find_active_activity_ids(large), vec!["review".to_string()]);
    }

    #[test]
    fn test_invalid_model_is_rejected_with_all_errors() {
        let dto = parse_model_yaml(
            r#"
id: bad
nodes:
  - { kind: ServiceTask, id: bill, handler: nope }
"#,
        )
        .unwrap();
        let err = compile_model(&dto, &HandlerRegistry::new()).unwrap_err();
        let DefinitionError::Invalid(messages) = err else {
            panic!("expected validation failure");
        };
        assert_eq!(messages.len(), 2);
    }
}
