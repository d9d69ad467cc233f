use std::sync::Arc;

use anyhow::{Context, Result};
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::store::core::RedisStore;

const META_BASE_KEY: &str = "orchestrator:meta";

/// Opaque key to JSON blob store; testnet snapshots live here under
/// `testnet_<build_id>`.
pub struct MetaStore {
    redis: Arc<RedisStore>,
}

impl MetaStore {
    pub fn new(redis: Arc<RedisStore>) -> Self {
        Self { redis }
    }

    pub async fn set_meta<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        let _: () = con
            .set(
                format!("{}:{}", META_BASE_KEY, key),
                serde_json::to_string(value)?,
            )
            .await?;
        Ok(())
    }

    pub async fn get_meta<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = con.get(format!("{}:{}", META_BASE_KEY, key)).await?;
        raw.map(|raw| {
            serde_json::from_str(&raw).with_context(|| format!("corrupt metadata under {key}"))
        })
        .transpose()
    }

    pub async fn delete_meta(&self, key: &str) -> Result<()> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        let _: () = con.del(format!("{}:{}", META_BASE_KEY, key)).await?;
        Ok(())
    }
}
