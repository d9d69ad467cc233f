use std::sync::Arc;

use crate::store::core::RedisStore;
use crate::store::domains::meta_store::MetaStore;
use crate::store::domains::node_store::NodeStore;
use crate::store::domains::server_store::ServerStore;

pub struct StoreContext {
    pub server_store: Arc<ServerStore>,
    pub node_store: Arc<NodeStore>,
    pub meta_store: Arc<MetaStore>,
}

impl StoreContext {
    pub fn new(store: Arc<RedisStore>) -> Self {
        Self {
            server_store: Arc::new(ServerStore::new(store.clone())),
            node_store: Arc::new(NodeStore::new(store.clone())),
            meta_store: Arc::new(MetaStore::new(store)),
        }
    }
}
