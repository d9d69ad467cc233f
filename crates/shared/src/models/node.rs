use serde::{Deserialize, Serialize};

/// One containerized chain node. `local_id` addresses the container on its
/// host; `absolute_num` is the testnet-wide index assigned at registration
/// and is re-derived from insertion order when a roster is reloaded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Node {
    pub testnet_id: String,
    pub server: u32,
    pub local_id: usize,
    #[serde(default)]
    pub absolute_num: usize,
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Node {
    pub fn by_abs_num(nodes: &[Node], absolute_num: usize) -> Option<&Node> {
        nodes.iter().find(|node| node.absolute_num == absolute_num)
    }
}

/// A helper container colocated with a primary node, addressed by the primary
/// node plus a class index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SidecarNode {
    pub node: Node,
    pub class_index: usize,
}
