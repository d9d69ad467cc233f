//! Bounded-concurrency fan-out over every node of a testnet. Workers report
//! failures to the build state instead of aborting their peers; each helper
//! joins all of its workers and returns the aggregate build error. The
//! absolute node number handed to callbacks is assigned in lexicographic
//! order over `(server index, local node index)` starting at zero.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::error;
use shared::models::Server;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::ssh::SshClient;
use crate::state::BuildState;

/// Scratch directory on each host files pass through before `docker cp`.
pub const HOST_STAGING_DIR: &str = "/home/appo/";

/// A per-node payload for [`copy_bytes_to_node_files`].
pub struct FileTransfer {
    pub data: Vec<u8>,
    pub dest: String,
    pub local_id: usize,
}

fn staging_path(src: &str) -> String {
    let name = Path::new(src)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| src.to_string());
    format!("{HOST_STAGING_DIR}{name}")
}

async fn join_all(tasks: &mut JoinSet<()>) {
    while tasks.join_next().await.is_some() {}
}

/// Invokes `f(server_num, local_node_num, absolute_node_num)` for every node,
/// in parallel under the thread limiter.
pub async fn all_node_exec<F, Fut>(
    servers: &[Server],
    build_state: &Arc<BuildState>,
    limit: &Arc<Semaphore>,
    f: F,
) -> Result<()>
where
    F: Fn(usize, usize, usize) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let mut tasks = JoinSet::new();
    let mut absolute = 0usize;
    for (server_num, server) in servers.iter().enumerate() {
        for local_num in 0..server.node_ips.len() {
            let permit = limit
                .clone()
                .acquire_owned()
                .await
                .context("thread limiter closed")?;
            let bs = build_state.clone();
            let work = f(server_num, local_num, absolute);
            tasks.spawn(async move {
                let _permit = permit;
                if bs.stop().await {
                    return;
                }
                if let Err(err) = work.await {
                    error!("node ({server_num}, {local_num}) failed: {err:#}");
                    bs.report_error(&err).await;
                }
            });
            absolute += 1;
        }
    }
    join_all(&mut tasks).await;
    build_state.result().await
}

/// Copies each `(src, dest)` pair onto every server, registering removal of
/// the destination as build cleanup.
pub async fn copy_to_servers(
    clients: &[Arc<SshClient>],
    build_state: &Arc<BuildState>,
    limit: &Arc<Semaphore>,
    transfers: &[(String, String)],
) -> Result<()> {
    let mut tasks = JoinSet::new();
    for client in clients {
        for (src, dest) in transfers {
            let permit = limit
                .clone()
                .acquire_owned()
                .await
                .context("thread limiter closed")?;
            let client = client.clone();
            let bs = build_state.clone();
            let (src, dest) = (src.clone(), dest.clone());
            tasks.spawn(async move {
                let _permit = permit;
                if bs.stop().await {
                    return;
                }
                if let Err(err) = scp_and_defer_removal(&client, &bs, &src, &dest).await {
                    error!("copy {src} -> {dest} failed: {err:#}");
                    bs.report_error(&err).await;
                }
            });
        }
    }
    join_all(&mut tasks).await;
    build_state.result().await
}

async fn scp_and_defer_removal(
    client: &Arc<SshClient>,
    build_state: &Arc<BuildState>,
    src: &str,
    dest: &str,
) -> Result<()> {
    let cleanup_client = client.clone();
    let cleanup_dest = dest.to_string();
    build_state
        .defer(async move {
            let _ = cleanup_client.run(&format!("rm -rf {cleanup_dest}")).await;
        })
        .await;
    client.scp(src, dest).await
}

/// Copies each `(src, dest)` pair into every container of every server in
/// two stages: stage the file on the host, then `docker cp` it into each
/// container. The container fan-out of a server starts strictly after its
/// staging copy finished.
pub async fn copy_to_all_nodes(
    servers: &[Server],
    clients: &[Arc<SshClient>],
    build_state: &Arc<BuildState>,
    limit: &Arc<Semaphore>,
    transfers: &[(String, String)],
) -> Result<()> {
    let mut tasks = JoinSet::new();
    for (server_num, server) in servers.iter().enumerate() {
        for (src, dest) in transfers {
            let client = clients[server_num].clone();
            let bs = build_state.clone();
            let limit = limit.clone();
            let node_count = server.node_ips.len();
            let (src, dest) = (src.clone(), dest.clone());
            let staged = staging_path(&src);
            tasks.spawn(async move {
                {
                    let _permit = match limit.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return,
                    };
                    if bs.stop().await {
                        return;
                    }
                    if let Err(err) = scp_and_defer_removal(&client, &bs, &src, &staged).await {
                        error!("staging {src} on server {server_num} failed: {err:#}");
                        bs.report_error(&err).await;
                        return;
                    }
                }

                let mut inner = JoinSet::new();
                for node in 0..node_count {
                    let permit = match limit.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return,
                    };
                    let client = client.clone();
                    let bs = bs.clone();
                    let staged = staged.clone();
                    let dest = dest.clone();
                    inner.spawn(async move {
                        let _permit = permit;
                        if bs.stop().await {
                            return;
                        }
                        if let Err(err) = client.docker_cp(node, &staged, &dest).await {
                            error!("docker cp into node {node}: {err:#}");
                            bs.report_error(&err).await;
                        }
                    });
                }
                join_all(&mut inner).await;
            });
        }
    }
    join_all(&mut tasks).await;
    build_state.result().await
}

/// Stages each blob under the build working dir with a generated name, then
/// distributes it to every container like [`copy_to_all_nodes`].
pub async fn copy_bytes_to_all_nodes(
    servers: &[Server],
    clients: &[Arc<SshClient>],
    build_state: &Arc<BuildState>,
    limit: &Arc<Semaphore>,
    payloads: &[(String, String)],
) -> Result<()> {
    let mut transfers = Vec::with_capacity(payloads.len());
    for (data, dest) in payloads {
        let name = Uuid::new_v4().simple().to_string();
        build_state.write(&name, data.as_bytes()).await?;
        transfers.push((name, dest.clone()));
    }
    copy_to_all_nodes(servers, clients, build_state, limit, &transfers).await
}

/// Lands bytes at `dest` inside a single container, via the build working
/// dir and the host staging path.
pub async fn single_cp(
    client: &Arc<SshClient>,
    build_state: &Arc<BuildState>,
    local_node: usize,
    data: &[u8],
    dest: &str,
) -> Result<()> {
    let name = Uuid::new_v4().simple().to_string();
    build_state.write(&name, data).await?;
    let staged = format!("{HOST_STAGING_DIR}{name}");

    let cleanup_client = client.clone();
    let cleanup_staged = staged.clone();
    build_state
        .defer(async move {
            let _ = cleanup_client.run(&format!("rm {cleanup_staged}")).await;
        })
        .await;

    client.scp(&name, &staged).await?;
    client.docker_cp(local_node, &staged, dest).await
}

/// Renders a config per node with `f` and lands it at `dest` inside that
/// node's container.
pub async fn create_configs<F>(
    servers: &[Server],
    clients: &[Arc<SshClient>],
    build_state: &Arc<BuildState>,
    limit: &Arc<Semaphore>,
    dest: &str,
    f: F,
) -> Result<()>
where
    F: Fn(usize, usize, usize) -> Result<Vec<u8>> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let mut tasks = JoinSet::new();
    let mut absolute = 0usize;
    for (server_num, server) in servers.iter().enumerate() {
        for local_num in 0..server.node_ips.len() {
            let permit = limit
                .clone()
                .acquire_owned()
                .await
                .context("thread limiter closed")?;
            let client = clients[server_num].clone();
            let bs = build_state.clone();
            let f = f.clone();
            let dest = dest.to_string();
            tasks.spawn(async move {
                let _permit = permit;
                if bs.stop().await {
                    return;
                }
                let result = match f(server_num, local_num, absolute) {
                    Ok(data) => single_cp(&client, &bs, local_num, &data, &dest).await,
                    Err(err) => Err(err),
                };
                if let Err(err) = result {
                    error!("config for node ({server_num}, {local_num}) failed: {err:#}");
                    bs.report_error(&err).await;
                }
            });
            absolute += 1;
        }
    }
    join_all(&mut tasks).await;
    build_state.result().await
}

/// Lands a batch of per-node payloads on one server's containers.
pub async fn copy_bytes_to_node_files(
    client: &Arc<SshClient>,
    build_state: &Arc<BuildState>,
    limit: &Arc<Semaphore>,
    transfers: Vec<FileTransfer>,
) -> Result<()> {
    let mut tasks = JoinSet::new();
    for transfer in transfers {
        let permit = limit
            .clone()
            .acquire_owned()
            .await
            .context("thread limiter closed")?;
        let client = client.clone();
        let bs = build_state.clone();
        tasks.spawn(async move {
            let _permit = permit;
            if bs.stop().await {
                return;
            }
            if let Err(err) = single_cp(
                &client,
                &bs,
                transfer.local_id,
                &transfer.data,
                &transfer.dest,
            )
            .await
            {
                error!("copy into node {} failed: {err:#}", transfer.local_id);
                bs.report_error(&err).await;
            }
        });
    }
    join_all(&mut tasks).await;
    build_state.result().await
}
