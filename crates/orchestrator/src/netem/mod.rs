//! Traffic shaping and link outages applied to running nodes. Thin verbs
//! over `tc` and `iptables` inside the node containers; the control API is
//! the only caller.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use log::warn;
use shared::models::{Netconf, Node};

use crate::ssh::SshClient;

const DEVICE: &str = "eth0";

fn shaping_command(conf: &Netconf) -> String {
    let mut command = format!("tc qdisc replace dev {DEVICE} root netem");
    if conf.limit > 0 {
        command.push_str(&format!(" limit {}", conf.limit));
    }
    if conf.delay > 0 {
        command.push_str(&format!(" delay {}ms", conf.delay));
    }
    if conf.loss > 0.0 {
        command.push_str(&format!(" loss {}%", conf.loss));
    }
    if conf.duplication > 0.0 {
        command.push_str(&format!(" duplicate {}%", conf.duplication));
    }
    if conf.corrupt > 0.0 {
        command.push_str(&format!(" corrupt {}%", conf.corrupt));
    }
    if conf.reorder > 0.0 {
        command.push_str(&format!(" reorder {}%", conf.reorder));
    }
    if !conf.rate.is_empty() {
        command.push_str(&format!(" rate {}", conf.rate));
    }
    command
}

fn remove_command() -> String {
    format!("tc qdisc del dev {DEVICE} root")
}

/// The iptables directives realizing a symmetric outage between two nodes:
/// each side drops traffic from the other's address. `insert` picks append
/// vs delete.
fn outage_commands(a: &Node, b: &Node, insert: bool) -> Vec<(u32, usize, String)> {
    let action = if insert { "-A" } else { "-D" };
    vec![
        (
            a.server,
            a.local_id,
            format!("iptables {action} INPUT -s {} -j DROP", b.ip),
        ),
        (
            b.server,
            b.local_id,
            format!("iptables {action} INPUT -s {} -j DROP", a.ip),
        ),
    ]
}

fn client_for<'a>(
    clients: &'a HashMap<u32, Arc<SshClient>>,
    node: &Node,
) -> Result<&'a Arc<SshClient>> {
    clients
        .get(&node.server)
        .ok_or_else(|| anyhow!("no client for server {}", node.server))
}

/// Applies one shaping config per addressed node.
pub async fn apply_all(
    clients: &HashMap<u32, Arc<SshClient>>,
    confs: &[Netconf],
    nodes: &[Node],
) -> Result<()> {
    for conf in confs {
        let node = Node::by_abs_num(nodes, conf.node)
            .ok_or_else(|| anyhow!("no node with absolute number {}", conf.node))?;
        let client = client_for(clients, node)?;
        client.docker_exec(node.local_id, &shaping_command(conf)).await?;
    }
    Ok(())
}

/// Applies the same shaping config to every node.
pub async fn apply_to_all(
    clients: &HashMap<u32, Arc<SshClient>>,
    conf: &Netconf,
    nodes: &[Node],
) -> Result<()> {
    for node in nodes {
        let client = client_for(clients, node)?;
        let conf = Netconf {
            node: node.absolute_num,
            ..conf.clone()
        };
        client.docker_exec(node.local_id, &shaping_command(&conf)).await?;
    }
    Ok(())
}

/// Strips shaping from every node. Nodes that were never shaped report an
/// error from `tc`; that is expected and ignored.
pub async fn remove_all(clients: &HashMap<u32, Arc<SshClient>>, nodes: &[Node]) {
    for node in nodes {
        let Ok(client) = client_for(clients, node) else {
            continue;
        };
        if let Err(err) = client.docker_exec(node.local_id, &remove_command()).await {
            warn!("removing netem from node {}: {err:#}", node.absolute_num);
        }
    }
}

/// Reads the active shaping configuration of every given node on one server.
pub async fn get_config_on_server(
    client: &Arc<SshClient>,
    nodes: &[Node],
) -> Result<Vec<Netconf>> {
    let mut confs = Vec::new();
    for node in nodes {
        let output = client
            .docker_exec(node.local_id, &format!("tc qdisc show dev {DEVICE}"))
            .await?;
        if let Some(conf) = parse_qdisc(node.absolute_num, &output) {
            confs.push(conf);
        }
    }
    Ok(confs)
}

/// Cuts the link between two nodes in both directions.
pub async fn make_outage(
    clients: &HashMap<u32, Arc<SshClient>>,
    a: &Node,
    b: &Node,
) -> Result<()> {
    for (server, local_id, command) in outage_commands(a, b, true) {
        let client = clients
            .get(&server)
            .ok_or_else(|| anyhow!("no client for server {server}"))?;
        client.docker_exec(local_id, &command).await?;
    }
    Ok(())
}

/// Restores the link between two nodes in both directions.
pub async fn remove_outage(
    clients: &HashMap<u32, Arc<SshClient>>,
    a: &Node,
    b: &Node,
) -> Result<()> {
    for (server, local_id, command) in outage_commands(a, b, false) {
        let client = clients
            .get(&server)
            .ok_or_else(|| anyhow!("no client for server {server}"))?;
        client.docker_exec(local_id, &command).await?;
    }
    Ok(())
}

/// Extracts a netem config from `tc qdisc show` output; `None` when no netem
/// discipline is installed. Unknown tokens are skipped.
fn parse_qdisc(node: usize, output: &str) -> Option<Netconf> {
    let line = output.lines().find(|line| line.contains("netem"))?;
    let mut conf = Netconf {
        node,
        ..Default::default()
    };
    let mut tokens = line.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        match token {
            "limit" => {
                if let Some(value) = tokens.peek().and_then(|v| v.parse::<u32>().ok()) {
                    conf.limit = value;
                }
            }
            "delay" => {
                if let Some(value) = tokens
                    .peek()
                    .and_then(|v| v.trim_end_matches("ms").parse::<f64>().ok())
                {
                    conf.delay = value.round() as u32;
                }
            }
            "loss" => {
                if let Some(value) = tokens
                    .peek()
                    .and_then(|v| v.trim_end_matches('%').parse::<f64>().ok())
                {
                    conf.loss = value;
                }
            }
            "duplicate" => {
                if let Some(value) = tokens
                    .peek()
                    .and_then(|v| v.trim_end_matches('%').parse::<f64>().ok())
                {
                    conf.duplication = value;
                }
            }
            "corrupt" => {
                if let Some(value) = tokens
                    .peek()
                    .and_then(|v| v.trim_end_matches('%').parse::<f64>().ok())
                {
                    conf.corrupt = value;
                }
            }
            "reorder" => {
                if let Some(value) = tokens
                    .peek()
                    .and_then(|v| v.trim_end_matches('%').parse::<f64>().ok())
                {
                    conf.reorder = value;
                }
            }
            "rate" => {
                if let Some(value) = tokens.peek() {
                    conf.rate = value.to_string();
                }
            }
            _ => {}
        }
    }
    Some(conf)
}
