use std::sync::Arc;

use shared::models::{DeploymentDetails, SidecarNode};

use super::TestNet;
use crate::state::BuildState;

/// A read-only projection of a testnet for one class of sidecar containers.
/// The sidecars share the build state and latest deployment details of the
/// testnet they ride along with.
pub struct Adjunct {
    pub testnet_id: String,
    pub index: usize,
    pub nodes: Vec<SidecarNode>,
    pub build_state: Arc<BuildState>,
    pub ldd: DeploymentDetails,
}

impl TestNet {
    /// Projects the sidecar view with the given class index over the current
    /// node roster.
    pub async fn adjunct(&self, index: usize) -> Adjunct {
        let nodes = self
            .nodes()
            .await
            .into_iter()
            .map(|node| SidecarNode {
                node,
                class_index: index,
            })
            .collect();
        Adjunct {
            testnet_id: self.id.clone(),
            index,
            nodes,
            build_state: self.build_state.clone(),
            ldd: self.latest_details().await,
        }
    }
}

impl Adjunct {
    /// Sidecar nodes freshly created by the in-progress build.
    pub async fn new_sidecar_nodes(&self, testnet: &TestNet) -> Vec<SidecarNode> {
        testnet
            .newly_built()
            .await
            .into_iter()
            .map(|node| SidecarNode {
                node,
                class_index: self.index,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::test_service_context;
    use shared::models::{Node, Server};

    #[tokio::test]
    async fn test_adjunct_projects_roster() {
        let ctx = test_service_context();
        let server = Server {
            id: 1,
            addr: "10.1.0.1".to_string(),
            max_nodes: 4,
            subnet: String::new(),
            node_ips: Vec::new(),
        };
        let details = DeploymentDetails {
            servers: vec![1],
            nodes: 2,
            ..Default::default()
        };
        let tn = TestNet::from_parts(
            "tn-adj",
            vec![server],
            Vec::new(),
            vec![details.clone()],
            details,
            &ctx,
            Arc::new(BuildState::new("tn-adj")),
        );
        for local_id in 0..2 {
            tn.add_node(Node {
                testnet_id: "tn-adj".to_string(),
                server: 1,
                local_id,
                absolute_num: 0,
                ip: format!("10.0.1.{}", local_id + 1),
                label: None,
            })
            .await;
        }

        let adjunct = tn.adjunct(1).await;
        assert_eq!(adjunct.index, 1);
        assert_eq!(adjunct.nodes.len(), 2);
        assert!(adjunct.nodes.iter().all(|sc| sc.class_index == 1));
        assert_eq!(adjunct.ldd.nodes, 2);
        assert_eq!(adjunct.new_sidecar_nodes(&tn).await.len(), 2);
    }
}
