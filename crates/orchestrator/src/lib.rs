mod api;
mod blockchains;
mod cli;
mod context;
mod deploy;
mod error;
pub mod helpers;
mod netem;
mod ssh;
mod state;
mod store;
mod testnet;

pub use api::server::start_server;
pub use cli::{Cli, OrchestratorConfig};
pub use context::ServiceContext;
pub use error::OrchestratorError;
pub use ssh::{ClientCache, SshClient};
pub use state::{BuildProgress, BuildRegistry, BuildState};
pub use store::core::{RedisStore, StoreContext};
pub use store::domains::meta_store::MetaStore;
pub use store::domains::node_store::NodeStore;
pub use store::domains::server_store::ServerStore;
pub use testnet::{Adjunct, TestNet, TestNetSnapshot};
