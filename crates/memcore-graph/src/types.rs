use serde::{Deserialize, Serialize};

/// The six node kinds the graph stores (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Entity,
    Fact,
    Event,
    Opinion,
    Instruction,
    Plan,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Entity => write!(f, "entity"),
            Self::Fact => write!(f, "fact"),
            Self::Event => write!(f, "event"),
            Self::Opinion => write!(f, "opinion"),
            Self::Instruction => write!(f, "instruction"),
            Self::Plan => write!(f, "plan"),
        }
    }
}

impl std::str::FromStr for NodeType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "entity" => Ok(Self::Entity),
            "fact" => Ok(Self::Fact),
            "event" => Ok(Self::Event),
            "opinion" => Ok(Self::Opinion),
            "instruction" => Ok(Self::Instruction),
            "plan" => Ok(Self::Plan),
            other => Err(format!("unknown node type: {other}")),
        }
    }
}

/// Conventional subtypes per node type (spec §3). `Node::subtype` stays a
/// free string in storage — these constants exist so callers don't
/// hand-type the same literal in ten places.
pub mod subtype {
    // entity
    pub const PERSON: &str = "person";
    pub const ORG: &str = "org";
    pub const PROJECT: &str = "project";
    pub const TOOL: &str = "tool";
    pub const PLACE: &str = "place";
    pub const DOCUMENT: &str = "document";
    pub const CONCEPT: &str = "concept";
    pub const ACCOUNT: &str = "account";
    // fact
    pub const DEFINITIONAL: &str = "definitional";
    pub const CONDITIONAL: &str = "conditional";
    pub const COMPARATIVE: &str = "comparative";
    // event
    pub const ACTION: &str = "action";
    pub const INCIDENT: &str = "incident";
    pub const CONVERSATION: &str = "conversation";
    pub const OUTCOME: &str = "outcome";
    pub const COMPLETED_PLAN: &str = "completed_plan";
    // instruction
    pub const RULE: &str = "rule";
    pub const TOOL_USAGE: &str = "tool_usage";
    pub const PROCESS: &str = "process";
    // plan
    pub const SCHEDULED: &str = "scheduled";
    pub const INTENDED: &str = "intended";
    pub const REQUESTED: &str = "requested";
    // opinion
    pub const USER_OPINION: &str = "user_opinion";
}

/// Where a node's content originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    User,
    Assistant,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

impl std::str::FromStr for Source {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(format!("unknown source: {other}")),
        }
    }
}

/// A single node in the typed memory graph (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub node_type: NodeType,
    pub subtype: Option<String>,
    pub content: String,
    pub salience: f64,
    pub confidence: f64,
    pub source: Source,
    pub created_at: String,
    pub valid_from: Option<String>,
    pub valid_until: Option<String>,
    pub superseded_by: Option<String>,
    pub attributes: serde_json::Value,
    pub can_summarize: bool,
    /// Required (Some) for instructions; defaults to 0.3 for plans; `None`
    /// for every other node type (spec §3 invariant).
    pub scope: Option<f64>,
}

impl Node {
    /// Default-valued constructor matching spec §3's field defaults
    /// (salience 1.0, confidence 1.0, can_summarize true unless it's an
    /// instruction, scope per node type).
    pub fn new(node_type: NodeType, content: impl Into<String>, source: Source) -> Self {
        let scope = match node_type {
            NodeType::Instruction => Some(0.5),
            NodeType::Plan => Some(0.3),
            _ => None,
        };
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            node_type,
            subtype: None,
            content: content.into(),
            salience: 1.0,
            confidence: 1.0,
            source,
            created_at: chrono::Utc::now().to_rfc3339(),
            valid_from: None,
            valid_until: None,
            superseded_by: None,
            attributes: serde_json::json!({}),
            can_summarize: !matches!(node_type, NodeType::Instruction),
            scope,
        }
    }
}

/// A typed, directed edge between two nodes (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub edge_type: String,
    pub attributes: serde_json::Value,
    pub created_at: String,
}

/// Common edge type conventions (spec §3). `Edge::edge_type` stays a free
/// string; these are the documented conventions, not an exhaustive set.
pub mod edge_type {
    pub const ABOUT: &str = "about";
    pub const HAS_ROLE: &str = "has_role";
    pub const WORKS_FOR: &str = "works_for";
    pub const MANAGES: &str = "manages";
    pub const WRITES_FOR: &str = "writes_for";
    pub const CLIENT_OF: &str = "client_of";
    pub const USED_BY: &str = "used_by";
    pub const SEE_ALSO: &str = "see_also";
    pub const HAS_INSTRUCTION: &str = "has_instruction";
}

/// A node's embedding vector, stored alongside a duplicated `node_type`
/// column so filtered vector scans don't need a join (spec §3).
#[derive(Debug, Clone)]
pub struct Embedding {
    pub node_id: String,
    pub node_type: NodeType,
    pub vector: Vec<f32>,
}

/// A node paired with a relationship edge, as returned by
/// `GraphStore::relationships`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub edge: Edge,
    pub far_node: Node,
    /// True when this node was the edge's `source_id` (i.e. the far node
    /// is the target); false when it was the target.
    pub outgoing: bool,
}
