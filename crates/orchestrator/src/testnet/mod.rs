mod adjunct;

pub use adjunct::Adjunct;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use log::error;
use serde::{Deserialize, Serialize};
use shared::models::{DeploymentDetails, Node, Server};
use tokio::sync::RwLock;

use crate::context::ServiceContext;
use crate::ssh::{ClientCache, SshClient};
use crate::state::BuildState;
use crate::store::core::StoreContext;

/// Metadata key a testnet's snapshot is stored under.
pub(crate) fn meta_key(testnet_id: &str) -> String {
    format!("testnet_{}", testnet_id)
}

/// The authoritative in-memory model of one testnet: its servers (with the
/// node addresses this testnet allocated on each), the full node roster, the
/// nodes of the in-progress build, and the deployment history. All mutation
/// goes through methods holding the embedded write lock; remote work always
/// happens outside it with client handles captured by value.
pub struct TestNet {
    pub id: String,
    pub build_state: Arc<BuildState>,
    stores: Arc<StoreContext>,
    cache: Arc<ClientCache>,
    clients: RwLock<HashMap<u32, Arc<SshClient>>>,
    inner: RwLock<Inner>,
}

struct Inner {
    servers: Vec<Server>,
    nodes: Vec<Node>,
    newly_built: Vec<Node>,
    details: Vec<DeploymentDetails>,
    combined: DeploymentDetails,
}

/// What survives a process restart: everything except live SSH clients and
/// the build state, which the registry re-owns on restore.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestNetSnapshot {
    pub id: String,
    pub servers: Vec<Server>,
    pub nodes: Vec<Node>,
    pub details: Vec<DeploymentDetails>,
    pub combined_details: DeploymentDetails,
}

impl TestNet {
    /// Creates a fresh testnet for a build: fetches the requested servers and
    /// opens one SSH pool per server up front. The servers' `node_ips` start
    /// empty; provisioning fills them as nodes are allocated.
    pub async fn new(
        details: DeploymentDetails,
        build_id: &str,
        ctx: &ServiceContext,
        build_state: Arc<BuildState>,
    ) -> Result<Self> {
        let mut servers = match ctx.stores.server_store.get_servers(&details.servers).await {
            Ok(servers) => servers,
            Err(err) => {
                error!("{err:#}");
                build_state.report_error(&err).await;
                return Err(err);
            }
        };
        for server in &mut servers {
            server.node_ips.clear();
        }

        let testnet = Self::from_parts(
            build_id,
            servers,
            Vec::new(),
            vec![details.clone()],
            details,
            ctx,
            build_state,
        );

        let servers = testnet.servers().await;
        for server in &servers {
            if let Err(err) = testnet.client_for(server.id).await {
                error!("{err:#}");
                testnet.build_state.report_error(&err).await;
                return Err(err);
            }
        }
        Ok(testnet)
    }

    /// Reloads a testnet from its snapshot. SSH clients are re-opened lazily
    /// on first use; the caller supplies the build state the registry
    /// allocated for the new lifecycle.
    pub async fn restore(
        testnet_id: &str,
        ctx: &ServiceContext,
        build_state: Arc<BuildState>,
    ) -> Result<Self> {
        let snapshot: TestNetSnapshot = ctx
            .stores
            .meta_store
            .get_meta(&meta_key(testnet_id))
            .await?
            .ok_or_else(|| anyhow!("testnet {testnet_id} has no stored snapshot"))?;

        let mut details = snapshot.details;
        if details.is_empty() {
            details.push(snapshot.combined_details.clone());
        }
        Ok(Self::from_parts(
            testnet_id,
            snapshot.servers,
            snapshot.nodes,
            details,
            snapshot.combined_details,
            ctx,
            build_state,
        ))
    }

    pub(crate) fn from_parts(
        testnet_id: &str,
        servers: Vec<Server>,
        nodes: Vec<Node>,
        details: Vec<DeploymentDetails>,
        combined: DeploymentDetails,
        ctx: &ServiceContext,
        build_state: Arc<BuildState>,
    ) -> Self {
        Self {
            id: testnet_id.to_string(),
            build_state,
            stores: ctx.stores.clone(),
            cache: ctx.clients.clone(),
            clients: RwLock::new(HashMap::new()),
            inner: RwLock::new(Inner {
                servers,
                nodes,
                newly_built: Vec::new(),
                details,
                combined,
            }),
        }
    }

    /// Registers a node and hands back its absolute number. The node's
    /// address is appended to its server's allocated `node_ips`, keeping
    /// `node_ips[local_id] == node.ip`.
    pub async fn add_node(&self, mut node: Node) -> usize {
        let mut inner = self.inner.write().await;
        node.absolute_num = inner.nodes.len();
        if let Some(server) = inner.servers.iter_mut().find(|s| s.id == node.server) {
            server.node_ips.push(node.ip.clone());
        }
        inner.newly_built.push(node.clone());
        inner.nodes.push(node);
        inner.nodes.len() - 1
    }

    /// Appends a deployment to the history and folds it into the combined
    /// view.
    pub async fn add_details(&self, dd: DeploymentDetails) {
        let mut inner = self.inner.write().await;
        inner.combined.merge_from(&dd);
        inner.details.push(dd);
    }

    /// Completes the build: runs deferred cleanup, forgets the newly-built
    /// set and snapshots the testnet.
    pub async fn finished_building(&self) -> Result<()> {
        self.build_state.done_building().await;
        self.inner.write().await.newly_built.clear();
        self.store().await
    }

    /// Persists the newly-built nodes, attaching `labels[i]` to the i-th of
    /// them when labels are given.
    pub async fn store_nodes(&self, labels: Option<Vec<String>>) -> Result<()> {
        let newly_built = self.newly_built().await;
        for (i, mut node) in newly_built.into_iter().enumerate() {
            if let Some(labels) = &labels {
                node.label = labels.get(i).cloned();
            }
            self.stores.node_store.insert_node(&node).await?;
        }
        Ok(())
    }

    pub async fn servers(&self) -> Vec<Server> {
        self.inner.read().await.servers.clone()
    }

    pub async fn nodes(&self) -> Vec<Node> {
        self.inner.read().await.nodes.clone()
    }

    pub async fn newly_built(&self) -> Vec<Node> {
        self.inner.read().await.newly_built.clone()
    }

    /// Looks up a server by id, returning an owned copy.
    pub async fn get_server(&self, id: u32) -> Option<Server> {
        self.inner
            .read()
            .await
            .servers
            .iter()
            .find(|server| server.id == id)
            .cloned()
    }

    pub async fn latest_details(&self) -> DeploymentDetails {
        let inner = self.inner.read().await;
        inner
            .details
            .last()
            .cloned()
            .unwrap_or_else(|| inner.combined.clone())
    }

    pub async fn combined_details(&self) -> DeploymentDetails {
        self.inner.read().await.combined.clone()
    }

    /// The SSH pool of one of this testnet's servers, dialing it if needed.
    pub async fn client_for(&self, server_id: u32) -> Result<Arc<SshClient>> {
        if let Some(client) = self.clients.read().await.get(&server_id) {
            return Ok(client.clone());
        }
        let server = self
            .get_server(server_id)
            .await
            .ok_or_else(|| anyhow!("server {server_id} is not part of testnet {}", self.id))?;
        let client = self.cache.client_for(&server).await?;
        self.clients.write().await.insert(server_id, client.clone());
        Ok(client)
    }

    /// One client per server, in server order, matching the index space the
    /// fan-out helpers iterate.
    pub async fn get_flat_clients(&self) -> Result<Vec<Arc<SshClient>>> {
        let servers = self.servers().await;
        let mut clients = Vec::with_capacity(servers.len());
        for server in &servers {
            clients.push(self.client_for(server.id).await?);
        }
        Ok(clients)
    }

    /// Buckets the node roster by server id; every server gets a bucket even
    /// when empty.
    pub async fn preorder_nodes(&self) -> HashMap<u32, Vec<Node>> {
        let inner = self.inner.read().await;
        Self::bucket_by_server(&inner.servers, &inner.nodes)
    }

    pub async fn preorder_new_nodes(&self) -> HashMap<u32, Vec<Node>> {
        let inner = self.inner.read().await;
        Self::bucket_by_server(&inner.servers, &inner.newly_built)
    }

    fn bucket_by_server(servers: &[Server], nodes: &[Node]) -> HashMap<u32, Vec<Node>> {
        let mut out: HashMap<u32, Vec<Node>> = servers
            .iter()
            .map(|server| (server.id, Vec::new()))
            .collect();
        for node in nodes {
            out.entry(node.server).or_default().push(node.clone());
        }
        out
    }

    pub async fn snapshot(&self) -> TestNetSnapshot {
        let inner = self.inner.read().await;
        TestNetSnapshot {
            id: self.id.clone(),
            servers: inner.servers.clone(),
            nodes: inner.nodes.clone(),
            details: inner.details.clone(),
            combined_details: inner.combined.clone(),
        }
    }

    /// Persists the snapshot under the testnet's metadata key.
    pub async fn store(&self) -> Result<()> {
        let snapshot = self.snapshot().await;
        self.stores
            .meta_store
            .set_meta(&meta_key(&self.id), &snapshot)
            .await
    }

    /// Removes all stored data of this testnet.
    pub async fn destroy(&self) -> Result<()> {
        self.stores.node_store.delete_nodes_by_testnet(&self.id).await?;
        self.stores.meta_store.delete_meta(&meta_key(&self.id)).await
    }
}
