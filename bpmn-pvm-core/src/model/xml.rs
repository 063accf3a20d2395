//! Reader for the executable subset of BPMN 2.0 XML.
//!
//! Only the first `<process>` of a document is read. Elements outside the
//! supported subset (diagram interchange, documentation, unknown extension
//! elements) are skipped. Namespace prefixes are ignored, so both
//! `activiti:assignee` and `camunda:assignee` style attributes work.

use super::dto::{FlowDto, NodeDto, ProcessModelDto};
use crate::bpmn::VariableMapping;
use crate::error::DefinitionError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;

type Attributes = HashMap<String, String>;

fn parse_error(err: impl std::fmt::Display) -> DefinitionError {
    DefinitionError::Parse(err.to_string())
}

fn attributes(e: &BytesStart<'_>) -> Result<Attributes, DefinitionError> {
    let mut map = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(parse_error)?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr.unescape_value().map_err(parse_error)?.into_owned();
        map.insert(key, value);
    }
    Ok(map)
}

fn required(attrs: &Attributes, element: &str, name: &str) -> Result<String, DefinitionError> {
    attrs
        .get(name)
        .cloned()
        .ok_or_else(|| DefinitionError::Parse(format!("<{element}> without '{name}'")))
}

/// Flow node for a BPMN element name, `None` for anything else.
fn flow_node(element: &str, attrs: &Attributes) -> Result<Option<NodeDto>, DefinitionError> {
    let id = || required(attrs, element, "id");
    let node = match element {
        "startEvent" => NodeDto::StartEvent { id: id()? },
        "endEvent" => NodeDto::EndEvent {
            id: id()?,
            terminate: false,
        },
        "task" => NodeDto::Task { id: id()? },
        "manualTask" => NodeDto::ManualTask { id: id()? },
        "userTask" => NodeDto::UserTask {
            id: id()?,
            assignee: attrs.get("assignee").cloned(),
            candidate_group: attrs.get("candidateGroups").cloned(),
        },
        "serviceTask" => NodeDto::ServiceTask {
            id: id()?,
            handler: attrs
                .get("handler")
                .or_else(|| attrs.get("class"))
                .or_else(|| attrs.get("delegateExpression"))
                .cloned()
                .ok_or_else(|| DefinitionError::Parse("<serviceTask> without a handler".into()))?,
        },
        "receiveTask" => NodeDto::ReceiveTask { id: id()? },
        "exclusiveGateway" => NodeDto::ExclusiveGateway {
            id: id()?,
            default: attrs.get("default").cloned(),
        },
        "parallelGateway" => NodeDto::ParallelGateway { id: id()? },
        "inclusiveGateway" => NodeDto::InclusiveGateway {
            id: id()?,
            default: attrs.get("default").cloned(),
        },
        "callActivity" => NodeDto::CallActivity {
            id: id()?,
            called_element: required(attrs, element, "calledElement")?,
            inputs: Vec::new(),
            outputs: Vec::new(),
        },
        _ => return Ok(None),
    };
    Ok(Some(node))
}

struct Scope {
    id: String,
    name: Option<String>,
    nodes: Vec<NodeDto>,
    flows: Vec<FlowDto>,
}

impl Scope {
    fn new(attrs: &Attributes, element: &str) -> Result<Self, DefinitionError> {
        Ok(Self {
            id: required(attrs, element, "id")?,
            name: attrs.get("name").cloned(),
            nodes: Vec::new(),
            flows: Vec::new(),
        })
    }
}

#[derive(Default)]
struct XmlState {
    scopes: Vec<Scope>,
    model: Option<ProcessModelDto>,
    /// Index in the innermost scope of a flow node whose element is open.
    open_node: Option<usize>,
    /// Index in the innermost scope of an open `<sequenceFlow>`.
    open_flow: Option<usize>,
    condition: Option<String>,
}

impl XmlState {
    fn open(&mut self, element: &str, attrs: Attributes, empty: bool) -> Result<(), DefinitionError> {
        if self.model.is_some() {
            return Ok(());
        }
        if element == "process" {
            if self.scopes.is_empty() {
                self.scopes.push(Scope::new(&attrs, element)?);
                if empty {
                    self.close(element)?;
                }
            }
            return Ok(());
        }
        let Some(scope) = self.scopes.last_mut() else {
            return Ok(());
        };

        match element {
            "subProcess" => {
                self.scopes.push(Scope::new(&attrs, element)?);
                if empty {
                    self.close(element)?;
                }
            }
            "sequenceFlow" => {
                scope.flows.push(FlowDto {
                    id: attrs.get("id").cloned(),
                    from: required(&attrs, element, "sourceRef")?,
                    to: required(&attrs, element, "targetRef")?,
                    condition: None,
                });
                if !empty {
                    self.open_flow = Some(scope.flows.len() - 1);
                }
            }
            "conditionExpression" if self.open_flow.is_some() && !empty => {
                self.condition = Some(String::new());
            }
            "terminateEventDefinition" => {
                if let Some(NodeDto::EndEvent { terminate, .. }) =
                    self.open_node.and_then(|i| scope.nodes.get_mut(i))
                {
                    *terminate = true;
                }
            }
            "in" | "out" => {
                let Some(NodeDto::CallActivity { inputs, outputs, .. }) =
                    self.open_node.and_then(|i| scope.nodes.get_mut(i))
                else {
                    return Ok(());
                };
                let (Some(source), Some(target)) = (attrs.get("source"), attrs.get("target")) else {
                    return Ok(());
                };
                let mapping = VariableMapping::new(source.clone(), target.clone());
                if element == "in" {
                    inputs.push(mapping);
                } else {
                    outputs.push(mapping);
                }
            }
            _ => {
                if let Some(node) = flow_node(element, &attrs)? {
                    scope.nodes.push(node);
                    if !empty {
                        self.open_node = Some(scope.nodes.len() - 1);
                    }
                }
            }
        }
        Ok(())
    }

    fn close(&mut self, element: &str) -> Result<(), DefinitionError> {
        if self.model.is_some() || self.scopes.is_empty() {
            return Ok(());
        }
        match element {
            "process" if self.scopes.len() == 1 => {
                if let Some(root) = self.scopes.pop() {
                    self.model = Some(ProcessModelDto {
                        id: root.id,
                        name: root.name,
                        nodes: root.nodes,
                        flows: root.flows,
                    });
                }
            }
            "subProcess" if self.scopes.len() > 1 => {
                if let Some(sub) = self.scopes.pop() {
                    if let Some(parent) = self.scopes.last_mut() {
                        parent.nodes.push(NodeDto::SubProcess {
                            id: sub.id,
                            nodes: sub.nodes,
                            flows: sub.flows,
                        });
                    }
                }
                self.open_node = None;
            }
            "sequenceFlow" => self.open_flow = None,
            "conditionExpression" => {
                if let (Some(text), Some(i)) = (self.condition.take(), self.open_flow) {
                    let text = text.trim();
                    if let Some(flow) = self.scopes.last_mut().and_then(|s| s.flows.get_mut(i)) {
                        flow.condition = (!text.is_empty()).then(|| text.to_string());
                    }
                }
            }
            _ => {
                if self.open_node.is_some() && flow_node_element(element) {
                    self.open_node = None;
                }
            }
        }
        Ok(())
    }

    fn text(&mut self, text: &str) {
        if let Some(condition) = self.condition.as_mut() {
            condition.push_str(text);
        }
    }

    fn finish(self) -> Result<ProcessModelDto, DefinitionError> {
        self.model
            .ok_or_else(|| DefinitionError::Parse("no complete <process> element found".into()))
    }
}

fn flow_node_element(element: &str) -> bool {
    matches!(
        element,
        "startEvent"
            | "endEvent"
            | "task"
            | "manualTask"
            | "userTask"
            | "serviceTask"
            | "receiveTask"
            | "exclusiveGateway"
            | "parallelGateway"
            | "inclusiveGateway"
            | "callActivity"
    )
}

/// Parse the first process of a BPMN 2.0 XML document.
pub fn parse_bpmn_xml(xml: &str) -> Result<ProcessModelDto, DefinitionError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut state = XmlState::default();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| DefinitionError::Parse(format!("at byte {}: {}", reader.buffer_position(), e)))?;
        match event {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                state.open(&name, attributes(&e)?, false)?;
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                state.open(&name, attributes(&e)?, true)?;
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                state.close(&name)?;
            }
            Event::Text(t) => state.text(&t.unescape().map_err(parse_error)?),
            Event::CData(c) => state.text(&String::from_utf8_lossy(&c.into_inner())),
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    state.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<definitions xmlns="http://www.omg.org/spec/BPMN/20100524/MODEL"
             xmlns:activiti="http://activiti.org/bpmn">
  <process id="order" name="Order" isExecutable="true">
    <startEvent id="start"/>
    <sequenceFlow id="f1" sourceRef="start" targetRef="check"/>
    <exclusiveGateway id="check" default="f3"/>
    <sequenceFlow id="f2" sourceRef="check" targetRef="review">
      <conditionExpression xsi:type="tFormalExpression"><![CDATA[${amount > 1000}]]></conditionExpression>
    </sequenceFlow>
    <sequenceFlow id="f3" sourceRef="check" targetRef="done"/>
    <userTask id="review" activiti:assignee="kermit" activiti:candidateGroups="management">
      <documentation>Review large orders</documentation>
    </userTask>
    <sequenceFlow id="f4" sourceRef="review" targetRef="sub"/>
    <subProcess id="sub">
      <startEvent id="sub_start"/>
      <sequenceFlow id="s1" sourceRef="sub_start" targetRef="call"/>
      <callActivity id="call" calledElement="billing">
        <extensionElements>
          <activiti:in source="amount" target="total"/>
          <activiti:out source="invoice" target="invoice"/>
        </extensionElements>
      </callActivity>
    </subProcess>
    <sequenceFlow id="f5" sourceRef="sub" targetRef="done"/>
    <endEvent id="done">
      <terminateEventDefinition/>
    </endEvent>
  </process>
  <process id="ignored"/>
</definitions>"#;

    #[test]
    fn test_parse_process_subset() {
        let dto = parse_bpmn_xml(ORDER).unwrap();
        assert_eq!(dto.id, "order");
        assert_eq!(dto.name.as_deref(), Some("Order"));
        assert_eq!(
            dto.all_node_ids(),
            vec!["start", "check", "review", "sub", "sub_start", "call", "done"]
        );
        assert_eq!(dto.flows.len(), 5);
        assert_eq!(dto.flows[1].condition.as_deref(), Some("${amount > 1000}"));
        assert_eq!(dto.nodes[1].default_flow(), Some("f3"));
        assert!(matches!(dto.nodes[4], NodeDto::EndEvent { terminate: true, .. }));
    }

    #[test]
    fn test_user_task_and_call_activity_extensions() {
        let dto = parse_bpmn_xml(ORDER).unwrap();
        assert_eq!(
            dto.nodes[2],
            NodeDto::UserTask {
                id: "review".into(),
                assignee: Some("kermit".into()),
                candidate_group: Some("management".into()),
            }
        );
        let NodeDto::SubProcess { nodes, flows, .. } = &dto.nodes[3] else {
            panic!("expected sub process");
        };
        assert_eq!(flows.len(), 1);
        match &nodes[1] {
            NodeDto::CallActivity {
                called_element,
                inputs,
                outputs,
                ..
            } => {
                assert_eq!(called_element, "billing");
                assert_eq!(inputs, &vec![VariableMapping::new("amount", "total")]);
                assert_eq!(outputs, &vec![VariableMapping::new("invoice", "invoice")]);
            }
            other => panic!("Expected CallActivity, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_process_is_an_error() {
        let err = parse_bpmn_xml("<definitions/>").unwrap_err();
        assert!(matches!(err, DefinitionError::Parse(_)));
    }

    #[test]
    fn test_missing_reference_is_an_error() {
        let xml = r#"<definitions><process id="p"><sequenceFlow id="f" sourceRef="a"/></process></definitions>"#;
        let err = parse_bpmn_xml(xml).unwrap_err();
        assert!(err.to_string().contains("targetRef"));
    }
}
