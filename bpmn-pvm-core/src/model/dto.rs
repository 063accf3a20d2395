use crate::bpmn::VariableMapping;
use serde::{Deserialize, Serialize};

fn is_false(v: &bool) -> bool {
    !v
}

// ── Top-level DTO ──

/// Authoring form of a process, shared by the YAML and BPMN XML readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessModelDto {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub nodes: Vec<NodeDto>,
    #[serde(default)]
    pub flows: Vec<FlowDto>,
}

// ── Flow ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub from: String,
    pub to: String,
    /// `${name op literal}` guard.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl FlowDto {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            id: None,
            from: from.into(),
            to: to.into(),
            condition: None,
        }
    }

    /// Explicit id, else `from->to`.
    pub fn flow_id(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("{}->{}", self.from, self.to))
    }
}

// ── Node (tagged enum) ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum NodeDto {
    StartEvent {
        id: String,
    },
    EndEvent {
        id: String,
        #[serde(default, skip_serializing_if = "is_false")]
        terminate: bool,
    },
    Task {
        id: String,
    },
    ManualTask {
        id: String,
    },
    UserTask {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        assignee: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        candidate_group: Option<String>,
    },
    ServiceTask {
        id: String,
        handler: String,
    },
    ReceiveTask {
        id: String,
    },
    ExclusiveGateway {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<String>,
    },
    ParallelGateway {
        id: String,
    },
    InclusiveGateway {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<String>,
    },
    SubProcess {
        id: String,
        nodes: Vec<NodeDto>,
        #[serde(default)]
        flows: Vec<FlowDto>,
    },
    CallActivity {
        id: String,
        called_element: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        inputs: Vec<VariableMapping>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        outputs: Vec<VariableMapping>,
    },
}

// ── NodeDto helpers ──

impl NodeDto {
    pub fn id(&self) -> &str {
        match self {
            NodeDto::StartEvent { id }
            | NodeDto::EndEvent { id, .. }
            | NodeDto::Task { id }
            | NodeDto::ManualTask { id }
            | NodeDto::UserTask { id, .. }
            | NodeDto::ServiceTask { id, .. }
            | NodeDto::ReceiveTask { id }
            | NodeDto::ExclusiveGateway { id, .. }
            | NodeDto::ParallelGateway { id }
            | NodeDto::InclusiveGateway { id, .. }
            | NodeDto::SubProcess { id, .. }
            | NodeDto::CallActivity { id, .. } => id,
        }
    }

    /// BPMN element name, used as the activity kind.
    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeDto::StartEvent { .. } => "startEvent",
            NodeDto::EndEvent { .. } => "endEvent",
            NodeDto::Task { .. } => "task",
            NodeDto::ManualTask { .. } => "manualTask",
            NodeDto::UserTask { .. } => "userTask",
            NodeDto::ServiceTask { .. } => "serviceTask",
            NodeDto::ReceiveTask { .. } => "receiveTask",
            NodeDto::ExclusiveGateway { .. } => "exclusiveGateway",
            NodeDto::ParallelGateway { .. } => "parallelGateway",
            NodeDto::InclusiveGateway { .. } => "inclusiveGateway",
            NodeDto::SubProcess { .. } => "subProcess",
            NodeDto::CallActivity { .. } => "callActivity",
        }
    }

    /// The default flow id of a gateway.
    pub fn default_flow(&self) -> Option<&str> {
        match self {
            NodeDto::ExclusiveGateway { default, .. } | NodeDto::InclusiveGateway { default, .. } => {
                default.as_deref()
            }
            _ => None,
        }
    }
}

impl ProcessModelDto {
    /// Every node id of the model, nested sub-process nodes included.
    pub fn all_node_ids(&self) -> Vec<&str> {
        fn walk<'a>(nodes: &'a [NodeDto], out: &mut Vec<&'a str>) {
            for node in nodes {
                out.push(node.id());
                if let NodeDto::SubProcess { nodes, .. } = node {
                    walk(nodes, out);
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.nodes, &mut out);
        out
    }
}
