use serde::{Deserialize, Serialize};
use serde_json::Value;
use ua_gateway_sdk::{DeadbandType, NodeClass};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Variable,
    Method,
    Folder,
    Object,
}

impl NodeType {
    /// Node type of a node class; objects are refined to folders by the
    /// type definition walk, every other class renders as `object`.
    pub fn from_class(class: NodeClass, is_folder: bool) -> Self {
        match class {
            NodeClass::Variable => NodeType::Variable,
            NodeClass::Method => NodeType::Method,
            NodeClass::Object if is_folder => NodeType::Folder,
            _ => NodeType::Object,
        }
    }
}

/// JSON envelope of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    #[serde(rename = "node-id")]
    pub node_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(rename = "value-schema", default, skip_serializing_if = "Option::is_none")]
    pub value_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(rename = "deadBand", default, skip_serializing_if = "Vec::is_empty")]
    pub dead_band: Vec<DeadbandType>,
    #[serde(
        rename = "minimumSamplingInterval",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub minimum_sampling_interval: Option<f64>,
    #[serde(default)]
    pub edges: Vec<NodeEdge>,
}

impl NodeDescriptor {
    pub fn new(node_id: impl Into<String>, name: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            node_id: node_id.into(),
            name: name.into(),
            node_type,
            value: None,
            value_schema: None,
            status: None,
            dead_band: Vec::new(),
            minimum_sampling_interval: None,
            edges: Vec::new(),
        }
    }
}

/// One forward hierarchical reference of a browsed node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEdge {
    #[serde(rename = "node-id")]
    pub node_id: String,
    pub name: String,
    #[serde(rename = "Type")]
    pub node_type: NodeType,
    pub relationship: String,
}
