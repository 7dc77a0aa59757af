use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// One complete flow-graph snapshot pushed by the host application.
///
/// A snapshot fully replaces the previous one; the engine never mutates a
/// snapshot in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiagramData {
    #[serde(default)]
    pub nodes: Vec<FlowNode>,
    #[serde(default)]
    pub links: Vec<FlowLink>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: String,
    pub title: String,
    /// Fill color; expected to be deterministic per node across snapshots.
    #[serde(default)]
    pub color: String,
    /// Free-form annotation appended to the node tooltip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowLink {
    pub source: String,
    pub target: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl DiagramData {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() || self.links.is_empty()
    }
}

/// Invalid-graph conditions. The upstream producer is responsible for
/// supplying a valid graph; these fail fast instead of producing
/// nonsensical geometry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),
    #[error("link {index} references unknown node '{id}'")]
    UnknownNode { index: usize, id: String },
    #[error("link {index} connects node '{id}' to itself")]
    SelfLoop { index: usize, id: String },
    #[error("link {index} has non-positive value {value}")]
    NonPositiveValue { index: usize, value: f64 },
    #[error("graph contains a cycle; left-to-right layout requires acyclic flow")]
    Cyclic,
    #[error("identity key '{0}' is shared by more than one element")]
    AmbiguousKey(String),
}

/// A validated snapshot with string ids resolved to indices and per-node
/// link lists derived in input order.
#[derive(Debug, Clone)]
pub struct FlowGraph {
    pub nodes: Vec<GraphNode>,
    pub links: Vec<GraphLink>,
}

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: String,
    pub title: String,
    pub color: String,
    pub extra: Option<String>,
    /// Sum of flow through the node: `max(sum incoming, sum outgoing)`.
    pub value: f64,
    /// Link indices, in input order. Input order is what link identity
    /// ordinals are assigned from, so it must never be re-sorted here.
    pub incoming: Vec<usize>,
    pub outgoing: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct GraphLink {
    pub source: usize,
    pub target: usize,
    pub value: f64,
    pub title: Option<String>,
    /// Position among the source node's outgoing links, in input order.
    pub ordinal: usize,
}

impl FlowGraph {
    pub fn new(data: &DiagramData) -> Result<Self, GraphError> {
        let mut index_of: HashMap<&str, usize> = HashMap::with_capacity(data.nodes.len());
        let mut nodes: Vec<GraphNode> = Vec::with_capacity(data.nodes.len());

        for node in &data.nodes {
            if index_of.insert(node.id.as_str(), nodes.len()).is_some() {
                return Err(GraphError::DuplicateNode(node.id.clone()));
            }
            nodes.push(GraphNode {
                id: node.id.clone(),
                title: node.title.clone(),
                color: node.color.clone(),
                extra: node.extra.clone(),
                value: 0.0,
                incoming: Vec::new(),
                outgoing: Vec::new(),
            });
        }

        let mut links: Vec<GraphLink> = Vec::with_capacity(data.links.len());
        for (index, link) in data.links.iter().enumerate() {
            let source = *index_of
                .get(link.source.as_str())
                .ok_or_else(|| GraphError::UnknownNode {
                    index,
                    id: link.source.clone(),
                })?;
            let target = *index_of
                .get(link.target.as_str())
                .ok_or_else(|| GraphError::UnknownNode {
                    index,
                    id: link.target.clone(),
                })?;

            if source == target {
                return Err(GraphError::SelfLoop {
                    index,
                    id: link.source.clone(),
                });
            }
            if !(link.value > 0.0) || !link.value.is_finite() {
                return Err(GraphError::NonPositiveValue {
                    index,
                    value: link.value,
                });
            }

            let ordinal = nodes[source].outgoing.len();
            nodes[source].outgoing.push(index);
            nodes[target].incoming.push(index);
            links.push(GraphLink {
                source,
                target,
                value: link.value,
                title: link.title.clone(),
                ordinal,
            });
        }

        for node in &mut nodes {
            let inflow: f64 = node.incoming.iter().map(|&i| links[i].value).sum();
            let outflow: f64 = node.outgoing.iter().map(|&i| links[i].value).sum();
            node.value = inflow.max(outflow);
        }

        Ok(Self { nodes, links })
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() || self.links.is_empty()
    }
}
