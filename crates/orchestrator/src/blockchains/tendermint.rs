use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use shared::utils::{json_array, json_object, json_str, json_str_opt};
use tokio::sync::{Mutex, Semaphore};

use crate::helpers;
use crate::testnet::TestNet;

const P2P_PORT: u16 = 26656;
const GENESIS_PATH: &str = "/root/.tendermint/config/genesis.json";
const DEFAULT_CHAIN_ID: &str = "testnet";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Validator {
    pub address: String,
    pub pub_key: ValidatorPubKey,
    pub power: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ValidatorPubKey {
    #[serde(rename = "type")]
    pub key_type: String,
    pub value: String,
}

pub async fn build(testnet: &TestNet, limit: &Arc<Semaphore>) -> Result<Option<Vec<String>>> {
    let servers = testnet.servers().await;
    let clients = testnet.get_flat_clients().await?;
    let bs = testnet.build_state.clone();
    let details = testnet.combined_details().await;

    let node_total: usize = servers.iter().map(|server| server.node_ips.len()).sum();
    bs.set_build_steps(1 + 4 * node_total as u64).await;
    bs.set_build_stage("Initializing the nodes").await;

    // filled by absolute node number so the start phase can exclude self
    let peers: Arc<Mutex<Vec<Option<String>>>> = Arc::new(Mutex::new(vec![None; node_total]));
    let validators: Arc<Mutex<Vec<Vec<Validator>>>> =
        Arc::new(Mutex::new(vec![Vec::new(); node_total]));

    {
        let clients = clients.clone();
        let servers = servers.clone();
        let peers = peers.clone();
        let validators = validators.clone();
        let bs = bs.clone();
        helpers::all_node_exec(
            &servers.clone(),
            &bs.clone(),
            limit,
            move |server_num, local_num, absolute| {
                let client = clients[server_num].clone();
                let ip = servers[server_num].node_ips[local_num].clone();
                let peers = peers.clone();
                let validators = validators.clone();
                let bs = bs.clone();
                async move {
                    client.docker_exec(local_num, "tendermint init").await?;

                    let res = client
                        .docker_exec(local_num, "tendermint show_node_id")
                        .await?;
                    let node_id = res.trim().to_string();
                    peers.lock().await[absolute] = Some(format!("{node_id}@{ip}:{P2P_PORT}"));
                    bs.increment_build_progress().await;

                    let raw = client
                        .docker_exec(local_num, &format!("cat {GENESIS_PATH}"))
                        .await?;
                    let harvested = parse_validators(&raw)
                        .with_context(|| format!("bad local genesis on node {absolute}"))?;
                    validators.lock().await[absolute] = harvested;
                    bs.increment_build_progress().await;
                    Ok(())
                }
            },
        )
        .await?;
    }

    let peers: Vec<String> = peers
        .lock()
        .await
        .iter()
        .enumerate()
        .map(|(i, peer)| {
            peer.clone()
                .ok_or_else(|| anyhow!("node {i} produced no peer identity"))
        })
        .collect::<Result<_>>()?;
    let validators: Vec<Validator> = validators.lock().await.concat();

    bs.set_build_stage("Propagating the genesis file").await;
    let chain_id = json_str_opt(&details.params, "chain_id")?
        .unwrap_or(DEFAULT_CHAIN_ID)
        .to_string();
    let genesis = genesis_file(&validators, Utc::now(), &chain_id);
    helpers::copy_bytes_to_all_nodes(
        &servers,
        &clients,
        &bs,
        limit,
        &[(genesis, GENESIS_PATH.to_string())],
    )
    .await?;
    bs.increment_build_progress().await;

    bs.set_build_stage("Starting tendermint").await;
    {
        let peers = peers.clone();
        let clients = clients.clone();
        let bs = bs.clone();
        helpers::all_node_exec(
            &servers,
            &bs.clone(),
            limit,
            move |server_num, local_num, absolute| {
                let client = clients[server_num].clone();
                let persistent = persistent_peers(&peers, absolute);
                let bs = bs.clone();
                async move {
                    client
                        .docker_execd_log(
                            local_num,
                            &format!(
                                "tendermint node --proxy_app=kvstore --p2p.persistent_peers={persistent}"
                            ),
                        )
                        .await?;
                    bs.increment_build_progress().await;
                    Ok(())
                }
            },
        )
        .await?;
    }

    Ok(None)
}

/// The persistent-peer list for one node: every harvested peer except its
/// own entry.
fn persistent_peers(peers: &[String], absolute: usize) -> String {
    peers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != absolute)
        .map(|(_, peer)| peer.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

/// Pulls the validator descriptors out of a node's generated local genesis.
fn parse_validators(raw: &str) -> Result<Vec<Validator>> {
    let genesis: serde_json::Value =
        serde_json::from_str(raw).context("local genesis is not valid JSON")?;
    let mut validators = Vec::new();
    for entry in json_array(&genesis, "validators")? {
        let pub_key = json_object(entry, "pub_key")?;
        validators.push(Validator {
            address: json_str(entry, "address")?.to_string(),
            pub_key: ValidatorPubKey {
                key_type: json_str(pub_key, "type")?.to_string(),
                value: json_str(pub_key, "value")?.to_string(),
            },
            power: json_str(entry, "power")?.to_string(),
            name: json_str(entry, "name")?.to_string(),
        });
    }
    Ok(validators)
}

/// The canonical genesis every node starts from; a pure function of the
/// harvested validator set, the build timestamp, and the chain id.
fn genesis_file(validators: &[Validator], genesis_time: DateTime<Utc>, chain_id: &str) -> String {
    json!({
        "genesis_time": genesis_time.format("%Y-%m-%dT%H:%M:%S%.9fZ").to_string(),
        "chain_id": chain_id,
        "consensus_params": {
            "block_size": {
                "max_bytes": "22020096",
                "max_gas": "-1"
            },
            "evidence": {
                "max_age": "100000"
            },
            "validator": {
                "pub_key_types": ["ed25519"]
            }
        },
        "validators": validators,
        "app_hash": ""
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn validator(name: &str) -> Validator {
        Validator {
            address: format!("ADDR-{name}"),
            pub_key: ValidatorPubKey {
                key_type: "tendermint/PubKeyEd25519".to_string(),
                value: format!("KEY-{name}"),
            },
            power: "10".to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_parse_validators_from_local_genesis() {
        let raw = r#"{
            "genesis_time": "2019-03-01T00:00:00.000000000Z",
            "chain_id": "local",
            "validators": [
                {
                    "address": "6AE5C701F508EB5B63343858E068C5843F28105F",
                    "pub_key": {
                        "type": "tendermint/PubKeyEd25519",
                        "value": "zXkUdFj6Xp7Oi0J1dVJrj0zFdPrFsGqjqMXZmgkwVCs="
                    },
                    "power": "10",
                    "name": ""
                }
            ],
            "app_hash": ""
        }"#;
        let validators = parse_validators(raw).unwrap();
        assert_eq!(validators.len(), 1);
        assert_eq!(
            validators[0].address,
            "6AE5C701F508EB5B63343858E068C5843F28105F"
        );
        assert_eq!(validators[0].pub_key.key_type, "tendermint/PubKeyEd25519");
        assert_eq!(validators[0].power, "10");
    }

    #[test]
    fn test_parse_validators_reports_missing_fields() {
        let raw = r#"{"validators": [{"address": "A", "power": "10", "name": ""}]}"#;
        let err = parse_validators(raw).unwrap_err().to_string();
        assert!(err.contains("`pub_key`"), "got: {err}");
    }

    #[test]
    fn test_genesis_is_deterministic_and_canonical() {
        let validators = vec![validator("v0"), validator("v1")];
        let time = Utc.with_ymd_and_hms(2019, 3, 1, 12, 0, 0).unwrap();

        let a = genesis_file(&validators, time, "net");
        let b = genesis_file(&validators, time, "net");
        assert_eq!(a, b);

        let decoded: serde_json::Value = serde_json::from_str(&a).unwrap();
        assert_eq!(decoded["chain_id"], "net");
        assert_eq!(decoded["validators"].as_array().unwrap().len(), 2);
        assert_eq!(decoded["genesis_time"], "2019-03-01T12:00:00.000000000Z");
        assert_eq!(
            decoded["consensus_params"]["validator"]["pub_key_types"][0],
            "ed25519"
        );
    }

    #[test]
    fn test_persistent_peers_excludes_self() {
        let peers = vec![
            "id0@10.0.0.1:26656".to_string(),
            "id1@10.0.0.2:26656".to_string(),
            "id2@10.0.1.1:26656".to_string(),
        ];
        let list = persistent_peers(&peers, 1);
        assert_eq!(list, "id0@10.0.0.1:26656,id2@10.0.1.1:26656");
        for (i, peer) in peers.iter().enumerate() {
            let list = persistent_peers(&peers, i);
            assert!(!list.contains(peer.as_str()));
            assert_eq!(list.split(',').count(), peers.len() - 1);
        }
    }
}
