use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Image used for nodes when a deployment names none at all.
pub const DEFAULT_IMAGE: &str = "testnet/node-base:latest";

/// A deployment request. `files[i]` and `images[i]` apply to the node with
/// `absolute_num == i`; when an array is shorter than `nodes`, its final
/// element is broadcast to the remaining nodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeploymentDetails {
    #[serde(default)]
    pub servers: Vec<u32>,
    #[serde(default)]
    pub nodes: usize,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub files: Vec<HashMap<String, String>>,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub blockchain: String,
}

impl DeploymentDetails {
    pub fn image_for(&self, absolute_num: usize) -> &str {
        self.images
            .get(absolute_num)
            .or_else(|| self.images.last())
            .map(String::as_str)
            .unwrap_or(DEFAULT_IMAGE)
    }

    pub fn files_for(&self, absolute_num: usize) -> Option<&HashMap<String, String>> {
        self.files.get(absolute_num).or_else(|| self.files.last())
    }

    /// Merges a follow-up deployment into this combined view. `files` is
    /// padded with empty maps up to the previous node count before the new
    /// entries are appended; `images` is padded with its first element (or
    /// the default image when none exists). Empty array fields in `dd` leave
    /// the combined view untouched; scalar fields take the new value.
    pub fn merge_from(&mut self, dd: &DeploymentDetails) {
        let prev_nodes = self.nodes;

        if !dd.files.is_empty() {
            while self.files.len() < prev_nodes {
                self.files.push(HashMap::new());
            }
            self.files.extend(dd.files.iter().cloned());
        }

        if !dd.images.is_empty() {
            let pad = self
                .images
                .first()
                .cloned()
                .unwrap_or_else(|| DEFAULT_IMAGE.to_string());
            while self.images.len() < prev_nodes {
                self.images.push(pad.clone());
            }
            self.images.extend(dd.images.iter().cloned());
        }

        if !dd.servers.is_empty() {
            self.servers = dd.servers.clone();
        }
        if !dd.params.is_null() {
            self.params = dd.params.clone();
        }
        if !dd.blockchain.is_empty() {
            self.blockchain = dd.blockchain.clone();
        }
        self.nodes = prev_nodes + dd.nodes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn files(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_merge_two_deployments() {
        let mut combined = DeploymentDetails {
            nodes: 2,
            files: vec![files(&[("a", "A")])],
            images: vec!["img1".to_string()],
            ..Default::default()
        };
        combined.merge_from(&DeploymentDetails {
            nodes: 1,
            files: vec![files(&[("b", "B")])],
            images: vec!["img2".to_string()],
            ..Default::default()
        });

        assert_eq!(combined.nodes, 3);
        assert_eq!(
            combined.files,
            vec![files(&[("a", "A")]), files(&[]), files(&[("b", "B")])]
        );
        assert_eq!(combined.images, vec!["img1", "img1", "img2"]);
    }

    #[test]
    fn test_merge_node_counts_accumulate() {
        let mut combined = DeploymentDetails {
            nodes: 2,
            ..Default::default()
        };
        let mut total = 2;
        for add in [1usize, 4, 3] {
            combined.merge_from(&DeploymentDetails {
                nodes: add,
                ..Default::default()
            });
            total += add;
            assert_eq!(combined.nodes, total);
        }
    }

    #[test]
    fn test_merge_array_lengths_cover_all_nodes() {
        let mut combined = DeploymentDetails {
            nodes: 2,
            ..Default::default()
        };
        // no files/images in the first deployment at all
        combined.merge_from(&DeploymentDetails {
            nodes: 3,
            files: vec![files(&[("x", "X")]); 3],
            images: vec!["img".to_string(); 3],
            ..Default::default()
        });
        assert_eq!(combined.files.len(), 5);
        assert_eq!(combined.images.len(), 5);
        assert_eq!(combined.images[0], DEFAULT_IMAGE);
    }

    #[test]
    fn test_merge_empty_arrays_do_not_mutate() {
        let mut combined = DeploymentDetails {
            nodes: 2,
            files: vec![files(&[("a", "A")])],
            images: vec!["img1".to_string()],
            blockchain: "tendermint".to_string(),
            ..Default::default()
        };
        combined.merge_from(&DeploymentDetails {
            nodes: 1,
            ..Default::default()
        });
        assert_eq!(combined.files, vec![files(&[("a", "A")])]);
        assert_eq!(combined.images, vec!["img1"]);
        assert_eq!(combined.blockchain, "tendermint");
    }

    #[test]
    fn test_merge_scalars_take_new_value() {
        let mut combined = DeploymentDetails {
            nodes: 1,
            blockchain: "tendermint".to_string(),
            params: json!({"chain_id": "one"}),
            servers: vec![1],
            ..Default::default()
        };
        combined.merge_from(&DeploymentDetails {
            nodes: 1,
            blockchain: "other".to_string(),
            params: json!({"chain_id": "two"}),
            servers: vec![1, 2],
            ..Default::default()
        });
        assert_eq!(combined.blockchain, "other");
        assert_eq!(combined.params, json!({"chain_id": "two"}));
        assert_eq!(combined.servers, vec![1, 2]);
    }

    #[test]
    fn test_image_broadcast() {
        let dd = DeploymentDetails {
            nodes: 3,
            images: vec!["img1".to_string(), "img2".to_string()],
            ..Default::default()
        };
        assert_eq!(dd.image_for(0), "img1");
        assert_eq!(dd.image_for(1), "img2");
        assert_eq!(dd.image_for(2), "img2");

        let empty = DeploymentDetails::default();
        assert_eq!(empty.image_for(0), DEFAULT_IMAGE);
    }
}
