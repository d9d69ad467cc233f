use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use redis::AsyncCommands;
use shared::models::Server;

use crate::store::core::RedisStore;

const SERVER_BASE_KEY: &str = "orchestrator:server";
const SERVER_INDEX: &str = "orchestrator:server_index";

pub struct ServerStore {
    redis: Arc<RedisStore>,
}

impl ServerStore {
    pub fn new(redis: Arc<RedisStore>) -> Self {
        Self { redis }
    }

    pub async fn add_server(&self, server: &Server) -> Result<()> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .sadd(SERVER_INDEX, server.id)
            .set(
                format!("{}:{}", SERVER_BASE_KEY, server.id),
                serde_json::to_string(server)?,
            );

        let _: () = pipe.query_async(&mut con).await?;
        Ok(())
    }

    pub async fn get_server(&self, id: u32) -> Result<Option<Server>> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;

        let raw: Option<String> = con.get(format!("{}:{}", SERVER_BASE_KEY, id)).await?;
        raw.map(|raw| {
            serde_json::from_str(&raw).with_context(|| format!("corrupt server row {id}"))
        })
        .transpose()
    }

    /// Fetches the given servers by id; every id must resolve.
    pub async fn get_servers(&self, ids: &[u32]) -> Result<Vec<Server>> {
        let mut servers = Vec::with_capacity(ids.len());
        for id in ids {
            let server = self
                .get_server(*id)
                .await?
                .ok_or_else(|| anyhow!("server {id} is not registered"))?;
            servers.push(server);
        }
        Ok(servers)
    }

    pub async fn get_all_servers(&self) -> Result<Vec<Server>> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;

        let ids: Vec<u32> = con.smembers(SERVER_INDEX).await?;
        let mut servers = Vec::with_capacity(ids.len());
        for id in ids {
            let raw: Option<String> = con.get(format!("{}:{}", SERVER_BASE_KEY, id)).await?;
            if let Some(raw) = raw {
                servers.push(
                    serde_json::from_str(&raw)
                        .with_context(|| format!("corrupt server row {id}"))?,
                );
            }
        }
        servers.sort_by_key(|server: &Server| server.id);
        Ok(servers)
    }

    pub async fn delete_server(&self, id: u32) -> Result<()> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .srem(SERVER_INDEX, id)
            .del(format!("{}:{}", SERVER_BASE_KEY, id));

        let _: () = pipe.query_async(&mut con).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::test_store_context;

    #[tokio::test]
    #[ignore = "requires a local redis instance"]
    async fn test_server_round_trip() {
        let stores = test_store_context().await;
        let server = Server {
            id: 1,
            addr: "10.1.0.1".to_string(),
            max_nodes: 10,
            subnet: "10.0.0.0/24".to_string(),
            node_ips: vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()],
        };
        stores.server_store.add_server(&server).await.unwrap();

        assert_eq!(
            stores.server_store.get_server(1).await.unwrap().unwrap(),
            server
        );
        assert!(stores.server_store.get_server(9).await.unwrap().is_none());
        assert!(stores.server_store.get_servers(&[1, 9]).await.is_err());
    }
}
