use actix_web::web::{Data, Path};
use actix_web::HttpResponse;
use serde_json::json;

use crate::context::ServiceContext;

/// Reports the live progress of a build, including its sticky error once one
/// was reported.
pub async fn build_status(path: Path<String>, ctx: Data<ServiceContext>) -> HttpResponse {
    match ctx.registry.get(&path).await {
        Some(bs) => HttpResponse::Ok().json(bs.progress().await),
        None => HttpResponse::NotFound().json(json!({
            "success": false,
            "error": format!("no build {}", *path)
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::routes::builds_routes;
    use crate::context::test_support::test_service_context;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_status_of_live_build() {
        let ctx = test_service_context();
        let bs = ctx.registry.create("b1", &[]).await.unwrap();
        bs.set_build_steps(4).await;
        bs.set_build_stage("Initializing the nodes").await;
        bs.increment_build_progress().await;
        bs.report_error(anyhow::anyhow!("node 2 unreachable")).await;

        let app = test::init_service(
            App::new()
                .app_data(Data::from(ctx))
                .service(builds_routes()),
        )
        .await;
        let req = test::TestRequest::get()
            .uri("/builds/b1/status")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["stage"], "Initializing the nodes");
        assert_eq!(body["steps_done"], 1);
        assert_eq!(body["steps_total"], 4);
        assert_eq!(body["error"], "node 2 unreachable");
        assert_eq!(body["finished"], false);
    }

    #[actix_web::test]
    async fn test_status_of_unknown_build() {
        let ctx = test_service_context();
        let app = test::init_service(
            App::new()
                .app_data(Data::from(ctx))
                .service(builds_routes()),
        )
        .await;
        let req = test::TestRequest::get()
            .uri("/builds/nope/status")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
