use std::sync::Arc;

use actix_web::middleware::{self, NormalizePath, TrailingSlash};
use actix_web::web::Data;
use actix_web::{web, App, HttpResponse, HttpServer};
use anyhow::Error;
use log::info;
use serde_json::json;

use crate::api::routes::{builds_routes, testnets_routes};
use crate::context::ServiceContext;

pub async fn start_server(host: &str, port: u16, ctx: Arc<ServiceContext>) -> Result<(), Error> {
    info!("Starting server at http://{}:{}", host, port);
    let ctx = Data::from(ctx);
    HttpServer::new(move || {
        App::new()
            .app_data(ctx.clone())
            .wrap(middleware::Logger::default())
            .wrap(NormalizePath::new(TrailingSlash::Trim))
            .service(testnets_routes())
            .service(builds_routes())
            .service(web::resource("/health").route(web::get().to(|| async {
                HttpResponse::Ok().json(json!({"status": "ok"}))
            })))
            .default_service(web::route().to(|| async {
                HttpResponse::NotFound().json(json!({
                    "success": false,
                    "error": "Resource not found"
                }))
            }))
    })
    .bind((host, port))?
    .run()
    .await?;
    Ok(())
}
