use std::sync::Arc;

use anyhow::{Context, Result};
use redis::AsyncCommands;
use shared::models::Node;

use crate::store::core::RedisStore;

const TESTNET_INDEX: &str = "orchestrator:testnet_index";

fn nodes_key(testnet_id: &str) -> String {
    format!("orchestrator:testnet:{}:nodes", testnet_id)
}

/// Node rows live in one insertion-ordered list per testnet. `absolute_num`
/// is not stored; it is re-derived from the list position on every read.
pub struct NodeStore {
    redis: Arc<RedisStore>,
}

impl NodeStore {
    pub fn new(redis: Arc<RedisStore>) -> Self {
        Self { redis }
    }

    pub async fn insert_node(&self, node: &Node) -> Result<()> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .sadd(TESTNET_INDEX, &node.testnet_id)
            .rpush(nodes_key(&node.testnet_id), serde_json::to_string(node)?);

        let _: () = pipe
            .query_async(&mut con)
            .await
            .with_context(|| format!("failed to insert node into testnet {}", node.testnet_id))?;
        Ok(())
    }

    pub async fn get_nodes_by_testnet(&self, testnet_id: &str) -> Result<Vec<Node>> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;

        let rows: Vec<String> = con.lrange(nodes_key(testnet_id), 0, -1).await?;
        rows.into_iter()
            .enumerate()
            .map(|(position, raw)| {
                let mut node: Node = serde_json::from_str(&raw)
                    .with_context(|| format!("corrupt node row in testnet {testnet_id}"))?;
                node.absolute_num = position;
                Ok(node)
            })
            .collect()
    }

    pub async fn get_nodes_by_server(&self, server_id: u32) -> Result<Vec<Node>> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;

        let testnets: Vec<String> = con.smembers(TESTNET_INDEX).await?;
        let mut nodes = Vec::new();
        for testnet_id in testnets {
            nodes.extend(
                self.get_nodes_by_testnet(&testnet_id)
                    .await?
                    .into_iter()
                    .filter(|node| node.server == server_id),
            );
        }
        Ok(nodes)
    }

    pub async fn delete_nodes_by_testnet(&self, testnet_id: &str) -> Result<()> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .srem(TESTNET_INDEX, testnet_id)
            .del(nodes_key(testnet_id));

        let _: () = pipe.query_async(&mut con).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::test_store_context;

    fn node(testnet_id: &str, server: u32, local_id: usize) -> Node {
        Node {
            testnet_id: testnet_id.to_string(),
            server,
            local_id,
            // deliberately wrong; reads must re-derive it from insertion order
            absolute_num: 99,
            ip: format!("10.0.{}.{}", server, local_id + 1),
            label: None,
        }
    }

    #[tokio::test]
    #[ignore = "requires a local redis instance"]
    async fn test_absolute_num_rederived_from_insertion_order() {
        let stores = test_store_context().await;
        for (server, local_id) in [(1, 0), (1, 1), (2, 0)] {
            stores
                .node_store
                .insert_node(&node("tn1", server, local_id))
                .await
                .unwrap();
        }

        let nodes = stores.node_store.get_nodes_by_testnet("tn1").await.unwrap();
        assert_eq!(nodes.len(), 3);
        let absolutes: Vec<usize> = nodes.iter().map(|n| n.absolute_num).collect();
        assert_eq!(absolutes, vec![0, 1, 2]);

        let on_server = stores.node_store.get_nodes_by_server(1).await.unwrap();
        assert_eq!(on_server.len(), 2);

        stores
            .node_store
            .delete_nodes_by_testnet("tn1")
            .await
            .unwrap();
        assert!(stores
            .node_store
            .get_nodes_by_testnet("tn1")
            .await
            .unwrap()
            .is_empty());
    }
}
