use serde::{Deserialize, Serialize};

/// A remote host that testnet containers are provisioned on. Server rows are
/// created out of band and are immutable for the lifetime of a build; the
/// `node_ips` of a stored row is the pool of container addresses the host
/// offers, while the copy held by a testnet only carries the addresses that
/// build actually allocated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Server {
    pub id: u32,
    pub addr: String,
    #[serde(default)]
    pub max_nodes: usize,
    #[serde(default)]
    pub subnet: String,
    #[serde(default)]
    pub node_ips: Vec<String>,
}
