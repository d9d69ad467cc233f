//! Node allocation and container provisioning, plus the top-level build
//! lifecycle the control API spawns: construct or restore the testnet, place
//! and launch containers, run the blockchain family's build template, then
//! persist the outcome.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::{error, info};
use shared::models::{DeploymentDetails, Node, Server};
use tokio::task::JoinSet;

use crate::blockchains;
use crate::context::ServiceContext;
use crate::helpers;
use crate::state::BuildState;
use crate::testnet::{TestNet, TestNetSnapshot};

/// One planned node placement: pool index, local id on that server, address.
type Placement = (usize, usize, String);

/// Builds a brand new testnet end to end against a build state the caller
/// already registered. Errors are reported to the build state; deferred
/// cleanup runs regardless of the outcome.
pub async fn run_build(
    ctx: Arc<ServiceContext>,
    details: DeploymentDetails,
    build_id: String,
    bs: Arc<BuildState>,
) {
    let result = async {
        let testnet = TestNet::new(details, &build_id, &ctx, bs.clone()).await?;
        finish_build(&ctx, &testnet).await
    }
    .await;

    conclude(&bs, &build_id, result).await;
}

/// Adds nodes to an existing testnet: restores it, appends the deployment to
/// its history and re-runs provisioning plus the family build over the
/// expanded roster.
pub async fn run_add_nodes(
    ctx: Arc<ServiceContext>,
    details: DeploymentDetails,
    testnet_id: String,
    bs: Arc<BuildState>,
) {
    let result = async {
        let testnet = TestNet::restore(&testnet_id, &ctx, bs.clone()).await?;
        testnet.add_details(details).await;
        finish_build(&ctx, &testnet).await
    }
    .await;

    conclude(&bs, &testnet_id, result).await;
}

async fn finish_build(ctx: &ServiceContext, testnet: &TestNet) -> Result<()> {
    provision(ctx, testnet).await?;
    let labels = blockchains::build(testnet, &ctx.limiter).await?;
    testnet.store_nodes(labels).await?;
    testnet.finished_building().await?;
    info!("build {} finished", testnet.id);
    Ok(())
}

async fn conclude(bs: &Arc<BuildState>, build_id: &str, result: Result<()>) {
    if let Err(err) = result {
        error!("build {build_id} failed: {err:#}");
        bs.report_error(&err).await;
    }
    // runs deferred cleanup even when the build never reached completion
    bs.done_building().await;
}

/// Plans where the requested nodes land: servers are filled in order, each up
/// to its address pool and capacity.
fn plan_allocation(pools: &[Server], occupancy: &[usize], requested: usize) -> Result<Vec<Placement>> {
    let mut occupancy = occupancy.to_vec();
    let mut placements = Vec::with_capacity(requested);
    for _ in 0..requested {
        let slot = pools.iter().enumerate().find(|(i, pool)| {
            occupancy[*i] < pool.node_ips.len()
                && (pool.max_nodes == 0 || occupancy[*i] < pool.max_nodes)
        });
        match slot {
            Some((i, pool)) => {
                let local_id = occupancy[i];
                placements.push((i, local_id, pool.node_ips[local_id].clone()));
                occupancy[i] += 1;
            }
            None => bail!(
                "not enough capacity: {} of {} nodes placed across {} servers",
                placements.len(),
                requested,
                pools.len()
            ),
        }
    }
    Ok(placements)
}

/// Allocates the latest deployment's nodes onto the testnet and launches one
/// container per new node, then lands any per-node files inside them.
pub async fn provision(ctx: &ServiceContext, testnet: &TestNet) -> Result<()> {
    let details = testnet.latest_details().await;
    let bs = &testnet.build_state;
    bs.set_build_stage("Provisioning the nodes").await;

    let pools = ctx
        .stores
        .server_store
        .get_servers(&details.servers)
        .await
        .context("deployment names unknown servers")?;
    let occupancy: Vec<usize> = {
        let mut counts = Vec::with_capacity(pools.len());
        for pool in &pools {
            counts.push(
                testnet
                    .get_server(pool.id)
                    .await
                    .map(|server| server.node_ips.len())
                    .unwrap_or(0),
            );
        }
        counts
    };

    let placements = plan_allocation(&pools, &occupancy, details.nodes)?;
    for (pool_idx, local_id, ip) in placements {
        testnet
            .add_node(Node {
                testnet_id: testnet.id.clone(),
                server: pools[pool_idx].id,
                local_id,
                absolute_num: 0,
                ip,
                label: None,
            })
            .await;
    }

    let combined = testnet.combined_details().await;
    let new_nodes = testnet.newly_built().await;
    let mut tasks = JoinSet::new();
    for node in &new_nodes {
        let permit = ctx
            .limiter
            .clone()
            .acquire_owned()
            .await
            .context("thread limiter closed")?;
        let client = testnet.client_for(node.server).await?;
        let bs = bs.clone();
        let name = format!("{}{}", ctx.config.node_prefix, node.local_id);
        let network = ctx.config.docker_network.clone();
        let image = combined.image_for(node.absolute_num).to_string();
        let ip = node.ip.clone();
        let local_id = node.local_id;
        tasks.spawn(async move {
            let _permit = permit;
            if bs.stop().await {
                return;
            }
            let command = format!(
                "docker rm -f {name} >/dev/null 2>&1; \
                 docker run -itd --cap-add NET_ADMIN --name {name} --network {network} --ip {ip} {image}"
            );
            if let Err(err) = client.run(&command).await {
                error!("provisioning node {local_id} failed: {err:#}");
                bs.report_error(&err).await;
            } else {
                bs.increment_build_progress().await;
            }
        });
    }
    while tasks.join_next().await.is_some() {}
    bs.result().await?;

    distribute_files(ctx, testnet, &combined, &new_nodes).await
}

/// Lands the deployment's per-node files inside the freshly built containers.
async fn distribute_files(
    ctx: &ServiceContext,
    testnet: &TestNet,
    combined: &DeploymentDetails,
    new_nodes: &[Node],
) -> Result<()> {
    if combined.files.is_empty() {
        return Ok(());
    }
    let bs = &testnet.build_state;
    for node in new_nodes {
        let Some(files) = combined.files_for(node.absolute_num) else {
            continue;
        };
        let client = testnet.client_for(node.server).await?;
        let transfers: Vec<helpers::FileTransfer> = files
            .iter()
            .map(|(path, content)| helpers::FileTransfer {
                data: content.clone().into_bytes(),
                dest: path.clone(),
                local_id: node.local_id,
            })
            .collect();
        helpers::copy_bytes_to_node_files(&client, bs, &ctx.limiter, transfers).await?;
    }
    Ok(())
}

/// Removes every container of a torn-down testnet. Failures are logged and
/// skipped; a vanished host must not wedge destruction.
pub async fn teardown(ctx: &ServiceContext, snapshot: &TestNetSnapshot) {
    for server in &snapshot.servers {
        let client = match ctx.clients.client_for(server).await {
            Ok(client) => client,
            Err(err) => {
                error!("skipping teardown on {}: {err:#}", server.addr);
                continue;
            }
        };
        for node in snapshot.nodes.iter().filter(|node| node.server == server.id) {
            let name = format!("{}{}", ctx.config.node_prefix, node.local_id);
            if let Err(err) = client.run(&format!("docker rm -f {name}")).await {
                error!("failed to remove container {name}: {err:#}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(id: u32, ips: &[&str]) -> Server {
        Server {
            id,
            addr: format!("10.1.0.{id}"),
            max_nodes: ips.len(),
            subnet: String::new(),
            node_ips: ips.iter().map(|ip| ip.to_string()).collect(),
        }
    }

    #[test]
    fn test_allocation_fills_servers_in_order() {
        let pools = vec![
            pool(1, &["10.0.0.1", "10.0.0.2"]),
            pool(2, &["10.0.1.1"]),
        ];
        let placements = plan_allocation(&pools, &[0, 0], 3).unwrap();
        assert_eq!(
            placements,
            vec![
                (0, 0, "10.0.0.1".to_string()),
                (0, 1, "10.0.0.2".to_string()),
                (1, 0, "10.0.1.1".to_string()),
            ]
        );
    }

    #[test]
    fn test_allocation_continues_from_existing_occupancy() {
        let pools = vec![pool(1, &["10.0.0.1", "10.0.0.2", "10.0.0.3"])];
        let placements = plan_allocation(&pools, &[2], 1).unwrap();
        assert_eq!(placements, vec![(0, 2, "10.0.0.3".to_string())]);
    }

    #[test]
    fn test_allocation_rejects_overflow() {
        let pools = vec![pool(1, &["10.0.0.1"])];
        let err = plan_allocation(&pools, &[0], 2).unwrap_err().to_string();
        assert!(err.contains("not enough capacity"), "got: {err}");
    }

    #[test]
    fn test_allocation_respects_max_nodes() {
        let mut capped = pool(1, &["10.0.0.1", "10.0.0.2"]);
        capped.max_nodes = 1;
        let pools = vec![capped, pool(2, &["10.0.1.1"])];
        let placements = plan_allocation(&pools, &[0, 0], 2).unwrap();
        assert_eq!(
            placements,
            vec![(0, 0, "10.0.0.1".to_string()), (1, 0, "10.0.1.1".to_string())]
        );
    }
}
