use actix_web::web::{Bytes, Data, Path};
use actix_web::HttpResponse;
use log::{error, info};
use serde_json::json;
use shared::models::DeploymentDetails;
use uuid::Uuid;

use crate::context::ServiceContext;
use crate::deploy;
use crate::testnet::{meta_key, TestNetSnapshot};

/// Decodes a deployment request, registers the build and spawns it in the
/// background. Responds immediately with the build id.
pub async fn create_testnet(body: Bytes, ctx: Data<ServiceContext>) -> HttpResponse {
    let details: DeploymentDetails = match serde_json::from_slice(&body) {
        Ok(details) => details,
        Err(err) => {
            return HttpResponse::BadRequest().json(json!({
                "success": false,
                "error": format!("invalid deployment request: {err}")
            }));
        }
    };
    if details.servers.is_empty() || details.nodes == 0 {
        return HttpResponse::BadRequest().json(json!({
            "success": false,
            "error": "deployment needs at least one server and one node"
        }));
    }

    let build_id = Uuid::new_v4().simple().to_string();
    let bs = match ctx.registry.create(&build_id, &details.servers).await {
        Ok(bs) => bs,
        Err(err) => {
            return HttpResponse::Conflict().json(json!({
                "success": false,
                "error": err.to_string()
            }));
        }
    };

    info!("starting build {build_id} ({} nodes)", details.nodes);
    let ctx = ctx.into_inner();
    let spawned_id = build_id.clone();
    tokio::spawn(async move {
        deploy::run_build(ctx, details, spawned_id, bs).await;
    });

    HttpResponse::Accepted().json(json!({
        "success": true,
        "build_id": build_id
    }))
}

/// Appends nodes to a stored testnet and re-runs the build over the expanded
/// roster in the background.
pub async fn add_nodes(
    path: Path<String>,
    body: Bytes,
    ctx: Data<ServiceContext>,
) -> HttpResponse {
    let testnet_id = path.into_inner();
    let details: DeploymentDetails = match serde_json::from_slice(&body) {
        Ok(details) => details,
        Err(err) => {
            return HttpResponse::BadRequest().json(json!({
                "success": false,
                "error": format!("invalid deployment request: {err}")
            }));
        }
    };

    let snapshot: TestNetSnapshot = match ctx.stores.meta_store.get_meta(&meta_key(&testnet_id)).await
    {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => {
            return HttpResponse::NotFound().json(json!({
                "success": false,
                "error": format!("testnet {testnet_id} not found")
            }));
        }
        Err(err) => {
            error!("loading snapshot of {testnet_id}: {err:#}");
            return HttpResponse::InternalServerError().json(json!({
                "success": false,
                "error": err.to_string()
            }));
        }
    };

    let mut server_ids: Vec<u32> = snapshot.servers.iter().map(|server| server.id).collect();
    for id in &details.servers {
        if !server_ids.contains(id) {
            server_ids.push(*id);
        }
    }

    let bs = match ctx.registry.create(&testnet_id, &server_ids).await {
        Ok(bs) => bs,
        Err(err) => {
            return HttpResponse::Conflict().json(json!({
                "success": false,
                "error": err.to_string()
            }));
        }
    };

    info!("adding {} nodes to testnet {testnet_id}", details.nodes);
    let ctx = ctx.into_inner();
    let spawned_id = testnet_id.clone();
    tokio::spawn(async move {
        deploy::run_add_nodes(ctx, details, spawned_id, bs).await;
    });

    HttpResponse::Accepted().json(json!({
        "success": true,
        "build_id": testnet_id
    }))
}

pub async fn get_testnet(path: Path<String>, ctx: Data<ServiceContext>) -> HttpResponse {
    match ctx
        .stores
        .meta_store
        .get_meta::<TestNetSnapshot>(&meta_key(&path))
        .await
    {
        Ok(Some(snapshot)) => HttpResponse::Ok().json(snapshot),
        Ok(None) => HttpResponse::NotFound().json(json!({
            "success": false,
            "error": format!("testnet {} not found", *path)
        })),
        Err(err) => {
            error!("loading snapshot of {}: {err:#}", *path);
            HttpResponse::InternalServerError().json(json!({
                "success": false,
                "error": err.to_string()
            }))
        }
    }
}

/// Tears the testnet's containers down and removes all of its stored data.
pub async fn destroy_testnet(path: Path<String>, ctx: Data<ServiceContext>) -> HttpResponse {
    let testnet_id = path.into_inner();
    let snapshot: TestNetSnapshot = match ctx.stores.meta_store.get_meta(&meta_key(&testnet_id)).await
    {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => {
            return HttpResponse::NotFound().json(json!({
                "success": false,
                "error": format!("testnet {testnet_id} not found")
            }));
        }
        Err(err) => {
            error!("loading snapshot of {testnet_id}: {err:#}");
            return HttpResponse::InternalServerError().json(json!({
                "success": false,
                "error": err.to_string()
            }));
        }
    };

    // unbind the build state first so teardown commands are not short-circuited
    // by a failed build's sticky error
    ctx.registry.remove(&testnet_id).await;
    deploy::teardown(&ctx, &snapshot).await;

    if let Err(err) = ctx.stores.node_store.delete_nodes_by_testnet(&testnet_id).await {
        error!("deleting node rows of {testnet_id}: {err:#}");
        return HttpResponse::InternalServerError().json(json!({
            "success": false,
            "error": err.to_string()
        }));
    }
    if let Err(err) = ctx.stores.meta_store.delete_meta(&meta_key(&testnet_id)).await {
        error!("deleting snapshot of {testnet_id}: {err:#}");
        return HttpResponse::InternalServerError().json(json!({
            "success": false,
            "error": err.to_string()
        }));
    }

    HttpResponse::Ok().json(json!({
        "success": true,
        "message": format!("testnet {testnet_id} destroyed")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::routes::testnets_routes;
    use crate::context::test_support::test_service_context;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_invalid_deployment_is_rejected() {
        let ctx = test_service_context();
        let app = test::init_service(
            App::new()
                .app_data(Data::from(ctx))
                .service(testnets_routes()),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/testnets")
            .set_payload("{\"nodes\": \"three\"}")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_empty_deployment_is_rejected() {
        let ctx = test_service_context();
        let app = test::init_service(
            App::new()
                .app_data(Data::from(ctx))
                .service(testnets_routes()),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/testnets")
            .set_payload("{}")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
