use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::sync::RwLock;

use super::BuildState;

/// Owns every live [`BuildState`], keyed by build id and by server id. The
/// server mapping points at the current build on that server and is rebound
/// when a new build starts there; a server can host at most one build at a
/// time.
#[derive(Default)]
pub struct BuildRegistry {
    by_build: RwLock<HashMap<String, Arc<BuildState>>>,
    by_server: RwLock<HashMap<u32, Arc<BuildState>>>,
}

impl BuildRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the state for a new build and binds it to the given servers.
    /// Fails when any of those servers still has an unfinished build.
    pub async fn create(&self, build_id: &str, server_ids: &[u32]) -> Result<Arc<BuildState>> {
        {
            let by_server = self.by_server.read().await;
            for id in server_ids {
                if let Some(active) = by_server.get(id) {
                    if !active.is_finished().await && active.build_id != build_id {
                        bail!(
                            "server {} is already running build {}",
                            id,
                            active.build_id
                        );
                    }
                }
            }
        }

        let state = Arc::new(BuildState::new(build_id));
        self.by_build
            .write()
            .await
            .insert(build_id.to_string(), state.clone());
        let mut by_server = self.by_server.write().await;
        for id in server_ids {
            by_server.insert(*id, state.clone());
        }
        Ok(state)
    }

    pub async fn get(&self, build_id: &str) -> Option<Arc<BuildState>> {
        self.by_build.read().await.get(build_id).cloned()
    }

    pub async fn for_server(&self, server_id: u32) -> Option<Arc<BuildState>> {
        self.by_server.read().await.get(&server_id).cloned()
    }

    pub async fn remove(&self, build_id: &str) {
        self.by_build.write().await.remove(build_id);
        self.by_server
            .write()
            .await
            .retain(|_, state| state.build_id != build_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_binds_build_and_servers() {
        let registry = BuildRegistry::new();
        let state = registry.create("b1", &[1, 2]).await.unwrap();
        assert_eq!(registry.get("b1").await.unwrap().build_id, state.build_id);
        assert_eq!(registry.for_server(2).await.unwrap().build_id, "b1");
        assert!(registry.for_server(3).await.is_none());
    }

    #[tokio::test]
    async fn test_one_active_build_per_server() {
        let registry = BuildRegistry::new();
        let first = registry.create("b1", &[1]).await.unwrap();
        assert!(registry.create("b2", &[1]).await.is_err());

        first.done_building().await;
        let second = registry.create("b2", &[1]).await.unwrap();
        assert_eq!(registry.for_server(1).await.unwrap().build_id, "b2");
        drop(second);
    }

    #[tokio::test]
    async fn test_remove_unbinds_servers() {
        let registry = BuildRegistry::new();
        registry.create("b1", &[1, 2]).await.unwrap();
        registry.remove("b1").await;
        assert!(registry.get("b1").await.is_none());
        assert!(registry.for_server(1).await.is_none());
    }
}
