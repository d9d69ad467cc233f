use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::cli::OrchestratorConfig;
use crate::ssh::ClientCache;
use crate::state::BuildRegistry;
use crate::store::core::StoreContext;

/// Everything a build or control-plane operation needs, wired once at
/// startup. The limiter caps concurrent remote operations across all
/// fan-outs in the process.
pub struct ServiceContext {
    pub config: Arc<OrchestratorConfig>,
    pub stores: Arc<StoreContext>,
    pub registry: Arc<BuildRegistry>,
    pub clients: Arc<ClientCache>,
    pub limiter: Arc<Semaphore>,
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::store::core::RedisStore;

    /// A service context wired against the test redis url. Nothing connects
    /// until a store or SSH client is actually used.
    pub fn test_service_context() -> Arc<ServiceContext> {
        let config = Arc::new(OrchestratorConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            redis_url: "redis://localhost:6379/15".to_string(),
            ssh_user: "appo".to_string(),
            ssh_key_path: "/dev/null".to_string(),
            node_prefix: "testnet-node".to_string(),
            docker_output_file: "/output.log".to_string(),
            docker_network: "testnet".to_string(),
            thread_limit: 4,
            verbose: false,
        });
        let registry = Arc::new(BuildRegistry::new());
        Arc::new(ServiceContext {
            config: config.clone(),
            stores: Arc::new(StoreContext::new(Arc::new(RedisStore::new_test()))),
            registry: registry.clone(),
            clients: Arc::new(ClientCache::new(config, registry)),
            limiter: Arc::new(Semaphore::new(4)),
        })
    }
}
