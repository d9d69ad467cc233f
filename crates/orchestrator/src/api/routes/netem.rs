//! Post-build network-emulation control. These routes keep the plain-text
//! contract of the original tooling around them: 400 on a request that does
//! not decode, 404 for an unknown testnet or node, 500 when the backend
//! fails, and a literal "Success" body otherwise.

use std::collections::HashMap;
use std::sync::Arc;

use actix_web::web::{Bytes, Data, Path};
use actix_web::HttpResponse;
use log::error;
use shared::models::{Netconf, Node};

use crate::context::ServiceContext;
use crate::netem;
use crate::ssh::SshClient;

/// The node roster of a testnet plus one SSH client per involved server.
async fn testnet_backend(
    ctx: &ServiceContext,
    testnet_id: &str,
) -> Result<(Vec<Node>, HashMap<u32, Arc<SshClient>>), HttpResponse> {
    let nodes = match ctx.stores.node_store.get_nodes_by_testnet(testnet_id).await {
        Ok(nodes) => nodes,
        Err(err) => {
            error!("loading nodes of {testnet_id}: {err:#}");
            return Err(HttpResponse::InternalServerError().body(err.to_string()));
        }
    };
    if nodes.is_empty() {
        return Err(HttpResponse::NotFound().body(format!("testnet {testnet_id} not found")));
    }

    let mut server_ids: Vec<u32> = nodes.iter().map(|node| node.server).collect();
    server_ids.sort_unstable();
    server_ids.dedup();

    let mut clients = HashMap::new();
    for server_id in server_ids {
        let server = match ctx.stores.server_store.get_server(server_id).await {
            Ok(Some(server)) => server,
            Ok(None) => {
                return Err(HttpResponse::InternalServerError()
                    .body(format!("server {server_id} is not registered")));
            }
            Err(err) => {
                error!("loading server {server_id}: {err:#}");
                return Err(HttpResponse::InternalServerError().body(err.to_string()));
            }
        };
        match ctx.clients.client_for(&server).await {
            Ok(client) => {
                clients.insert(server_id, client);
            }
            Err(err) => {
                error!("connecting to server {server_id}: {err:#}");
                return Err(HttpResponse::InternalServerError().body(err.to_string()));
            }
        }
    }
    Ok((nodes, clients))
}

pub async fn apply_netem(
    path: Path<String>,
    body: Bytes,
    ctx: Data<ServiceContext>,
) -> HttpResponse {
    let confs: Vec<Netconf> = match serde_json::from_slice(&body) {
        Ok(confs) => confs,
        Err(err) => return HttpResponse::BadRequest().body(err.to_string()),
    };
    let (nodes, clients) = match testnet_backend(&ctx, &path).await {
        Ok(backend) => backend,
        Err(response) => return response,
    };
    if let Err(err) = netem::apply_all(&clients, &confs, &nodes).await {
        error!("applying netem on {}: {err:#}", *path);
        return HttpResponse::InternalServerError().body(err.to_string());
    }
    HttpResponse::Ok().body("Success")
}

pub async fn apply_netem_all(
    path: Path<String>,
    body: Bytes,
    ctx: Data<ServiceContext>,
) -> HttpResponse {
    let conf: Netconf = match serde_json::from_slice(&body) {
        Ok(conf) => conf,
        Err(err) => return HttpResponse::BadRequest().body(err.to_string()),
    };
    let (nodes, clients) = match testnet_backend(&ctx, &path).await {
        Ok(backend) => backend,
        Err(response) => return response,
    };
    netem::remove_all(&clients, &nodes).await;
    if let Err(err) = netem::apply_to_all(&clients, &conf, &nodes).await {
        error!("applying netem on {}: {err:#}", *path);
        return HttpResponse::InternalServerError().body(err.to_string());
    }
    HttpResponse::Ok().body("Success")
}

pub async fn remove_netem(path: Path<String>, ctx: Data<ServiceContext>) -> HttpResponse {
    let (nodes, clients) = match testnet_backend(&ctx, &path).await {
        Ok(backend) => backend,
        Err(response) => return response,
    };
    netem::remove_all(&clients, &nodes).await;
    HttpResponse::Ok().body("Success")
}

pub async fn get_netem(path: Path<String>, ctx: Data<ServiceContext>) -> HttpResponse {
    let (nodes, clients) = match testnet_backend(&ctx, &path).await {
        Ok(backend) => backend,
        Err(response) => return response,
    };
    let mut confs = Vec::new();
    for (server_id, client) in &clients {
        let on_server: Vec<Node> = nodes
            .iter()
            .filter(|node| node.server == *server_id)
            .cloned()
            .collect();
        match netem::get_config_on_server(client, &on_server).await {
            Ok(server_confs) => confs.extend(server_confs),
            Err(err) => {
                error!("reading netem on server {server_id}: {err:#}");
                return HttpResponse::InternalServerError().body(err.to_string());
            }
        }
    }
    confs.sort_by_key(|conf| conf.node);
    HttpResponse::Ok().json(confs)
}

fn parse_outage_path(
    path: &(String, String, String),
) -> Result<(String, usize, usize), HttpResponse> {
    let (testnet_id, node1, node2) = path;
    let node1 = node1
        .parse::<usize>()
        .map_err(|err| HttpResponse::BadRequest().body(err.to_string()))?;
    let node2 = node2
        .parse::<usize>()
        .map_err(|err| HttpResponse::BadRequest().body(err.to_string()))?;
    Ok((testnet_id.clone(), node1, node2))
}

async fn change_outage(
    path: Path<(String, String, String)>,
    ctx: Data<ServiceContext>,
    insert: bool,
) -> HttpResponse {
    let (testnet_id, node1, node2) = match parse_outage_path(&path) {
        Ok(parsed) => parsed,
        Err(response) => return response,
    };
    let (nodes, clients) = match testnet_backend(&ctx, &testnet_id).await {
        Ok(backend) => backend,
        Err(response) => return response,
    };

    let Some(a) = Node::by_abs_num(&nodes, node1) else {
        return HttpResponse::NotFound().body(format!("no node {node1} in {testnet_id}"));
    };
    let Some(b) = Node::by_abs_num(&nodes, node2) else {
        return HttpResponse::NotFound().body(format!("no node {node2} in {testnet_id}"));
    };

    let result = if insert {
        netem::make_outage(&clients, a, b).await
    } else {
        netem::remove_outage(&clients, a, b).await
    };
    if let Err(err) = result {
        error!("outage change between {node1} and {node2}: {err:#}");
        return HttpResponse::InternalServerError().body(err.to_string());
    }
    HttpResponse::Ok().body("Success")
}

pub async fn add_outage(
    path: Path<(String, String, String)>,
    ctx: Data<ServiceContext>,
) -> HttpResponse {
    change_outage(path, ctx, true).await
}

pub async fn remove_outage(
    path: Path<(String, String, String)>,
    ctx: Data<ServiceContext>,
) -> HttpResponse {
    change_outage(path, ctx, false).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::routes::testnets_routes;
    use crate::context::test_support::test_service_context;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_undecodable_netem_body_is_rejected() {
        let ctx = test_service_context();
        let app = test::init_service(
            App::new()
                .app_data(Data::from(ctx))
                .service(testnets_routes()),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/testnets/tn1/netem")
            .set_payload("not json")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_outage_with_non_numeric_node_is_rejected() {
        let ctx = test_service_context();
        let app = test::init_service(
            App::new()
                .app_data(Data::from(ctx))
                .service(testnets_routes()),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/testnets/tn1/outage/zero/1")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
