//! Nodes, trees, and the canonical snapshot read model.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::asset::{AssetUri, MediaKind};

/// Template id recorded for nodes created by direct upload rather than a
/// render job.
pub const UPLOAD_TEMPLATE_ID: &str = "Upload";

/// Per-node asset map, split by storage class.
///
/// Upload nodes carry `input` entries; rendered nodes carry `output`
/// entries; placeholder nodes carry neither.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetBundle {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input: BTreeMap<MediaKind, Vec<AssetUri>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub output: BTreeMap<MediaKind, Vec<AssetUri>>,
}

impl AssetBundle {
    pub fn from_outputs(outputs: BTreeMap<MediaKind, Vec<AssetUri>>) -> Self {
        Self {
            input: BTreeMap::new(),
            output: outputs,
        }
    }

    pub fn from_input(kind: MediaKind, uri: AssetUri) -> Self {
        let mut input = BTreeMap::new();
        input.insert(kind, vec![uri]);
        Self {
            input,
            output: BTreeMap::new(),
        }
    }

    /// Most recent output asset of the given kind.
    pub fn latest_output(&self, kind: MediaKind) -> Option<&AssetUri> {
        self.output.get(&kind).and_then(|list| list.last())
    }

    /// Most recent staged input asset of the given kind.
    pub fn latest_input(&self, kind: MediaKind) -> Option<&AssetUri> {
        self.input.get(&kind).and_then(|list| list.last())
    }

    /// Most recent asset of the given kind, preferring rendered outputs
    /// over staged inputs.
    pub fn latest(&self, kind: MediaKind) -> Option<&AssetUri> {
        self.latest_output(kind).or_else(|| self.latest_input(kind))
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_empty() && self.output.is_empty()
    }
}

/// Node lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Pending,
    Completed,
}

impl NodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Completed => "completed",
        }
    }
}

/// One generation/upload step with persisted parameters, produced assets,
/// and its resolved parent set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub node_id: String,
    pub tree_id: i64,
    pub template_id: String,
    pub title: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub assets: AssetBundle,
    pub status: NodeStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub parent_ids: Vec<String>,
}

/// A project tree. Owns zero or more nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    pub tree_id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Canonical full-tree read model: every node with parent ids attached,
/// creation-time ascending. All callers consume this shape; there are no
/// partial or paginated reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub tree_id: i64,
    pub name: String,
    pub nodes: Vec<Node>,
}

/// Insert payload for a new node.
#[derive(Debug, Clone)]
pub struct NewNode {
    pub node_id: String,
    pub tree_id: i64,
    pub parent_ids: Vec<String>,
    pub template_id: String,
    pub title: String,
    pub parameters: BTreeMap<String, Value>,
    pub assets: AssetBundle,
    pub status: NodeStatus,
}

/// Partial update payload. `parameters` and `assets` are rewritten whole
/// when supplied; there is no deep merge.
#[derive(Debug, Clone, Default)]
pub struct NodeUpdate {
    pub template_id: Option<String>,
    pub title: Option<String>,
    pub parameters: Option<BTreeMap<String, Value>>,
    pub assets: Option<AssetBundle>,
    pub status: Option<NodeStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::StorageClass;

    fn uri(name: &str, token: u64) -> AssetUri {
        AssetUri::output(name, "", token)
    }

    #[test]
    fn test_latest_prefers_newest_output() {
        let mut bundle = AssetBundle::default();
        bundle
            .output
            .insert(MediaKind::Image, vec![uri("a.png", 1), uri("b.png", 2)]);
        assert_eq!(bundle.latest(MediaKind::Image).unwrap().filename, "b.png");
    }

    #[test]
    fn test_latest_falls_back_to_input_for_uploads() {
        let bundle = AssetBundle::from_input(MediaKind::Image, AssetUri::input("up.png", 3));
        let found = bundle.latest(MediaKind::Image).unwrap();
        assert_eq!(found.filename, "up.png");
        assert_eq!(found.class, StorageClass::Input);
        assert!(bundle.latest(MediaKind::Video).is_none());
    }

    #[test]
    fn test_bundle_json_shape() {
        let bundle = AssetBundle::from_input(MediaKind::Image, AssetUri::input("up.png", 3));
        let json = serde_json::to_value(&bundle).unwrap();
        assert!(json.get("output").is_none());
        let inputs = json["input"]["image"].as_array().unwrap();
        assert_eq!(inputs.len(), 1);
        assert!(inputs[0].as_str().unwrap().starts_with("/view?filename=up.png"));
    }
}
