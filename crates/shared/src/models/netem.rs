use serde::{Deserialize, Serialize};

/// Traffic-shaping parameters for one node. `node` addresses the target by
/// absolute number; zero-valued fields are left unshaped.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Netconf {
    #[serde(default)]
    pub node: usize,
    /// Packet limit of the netem queue.
    #[serde(default)]
    pub limit: u32,
    /// Packet loss in percent.
    #[serde(default)]
    pub loss: f64,
    /// Added delay in milliseconds.
    #[serde(default)]
    pub delay: u32,
    /// Bandwidth cap, e.g. "1mbit". Empty means uncapped.
    #[serde(default)]
    pub rate: String,
    #[serde(default)]
    pub duplication: f64,
    #[serde(default)]
    pub corrupt: f64,
    #[serde(default)]
    pub reorder: f64,
}
