mod tendermint;

use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::sync::Semaphore;

use crate::testnet::TestNet;

/// Runs the build template of the deployment's blockchain family over the
/// testnet: initialize every node, synthesize and distribute the genesis,
/// then start the chain processes. Returns per-node labels when the family
/// produces them.
pub async fn build(testnet: &TestNet, limit: &Arc<Semaphore>) -> Result<Option<Vec<String>>> {
    let family = testnet.combined_details().await.blockchain.to_lowercase();
    match family.as_str() {
        "tendermint" => tendermint::build(testnet, limit).await,
        "" => bail!("deployment does not name a blockchain family"),
        other => bail!("unsupported blockchain family: {other}"),
    }
}
