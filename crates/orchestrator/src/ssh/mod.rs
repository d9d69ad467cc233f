mod client;

pub use client::SshClient;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use shared::models::Server;
use tokio::sync::RwLock;

use crate::cli::OrchestratorConfig;
use crate::state::BuildRegistry;

/// Process-wide cache of SSH client pools, one per server. A pool is dialed
/// on first use and kept for later builds and control-plane calls.
pub struct ClientCache {
    config: Arc<OrchestratorConfig>,
    registry: Arc<BuildRegistry>,
    clients: RwLock<HashMap<u32, Arc<SshClient>>>,
}

impl ClientCache {
    pub fn new(config: Arc<OrchestratorConfig>, registry: Arc<BuildRegistry>) -> Self {
        Self {
            config,
            registry,
            clients: RwLock::new(HashMap::new()),
        }
    }

    pub async fn client_for(&self, server: &Server) -> Result<Arc<SshClient>> {
        if let Some(client) = self.clients.read().await.get(&server.id) {
            return Ok(client.clone());
        }

        let client = Arc::new(
            SshClient::connect(
                &server.addr,
                server.id,
                self.config.clone(),
                self.registry.clone(),
            )
            .await?,
        );
        let mut clients = self.clients.write().await;
        Ok(clients.entry(server.id).or_insert(client).clone())
    }

    /// Closes and forgets the pool of one server.
    pub async fn drop_client(&self, server_id: u32) {
        let client = self.clients.write().await.remove(&server_id);
        if let Some(client) = client {
            client.close().await;
        }
    }
}
