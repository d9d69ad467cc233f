pub(crate) mod netem;
pub(crate) mod status;
pub(crate) mod testnet;

use actix_web::web::{self, delete, get, post};
use actix_web::Scope;

pub fn testnets_routes() -> Scope {
    web::scope("/testnets")
        .route("", post().to(testnet::create_testnet))
        .route("/{testnet_id}", get().to(testnet::get_testnet))
        .route("/{testnet_id}", delete().to(testnet::destroy_testnet))
        .route("/{testnet_id}/nodes", post().to(testnet::add_nodes))
        .route("/{testnet_id}/netem", post().to(netem::apply_netem))
        .route("/{testnet_id}/netem/all", post().to(netem::apply_netem_all))
        .route("/{testnet_id}/netem", delete().to(netem::remove_netem))
        .route("/{testnet_id}/netem", get().to(netem::get_netem))
        .route(
            "/{testnet_id}/outage/{node1}/{node2}",
            post().to(netem::add_outage),
        )
        .route(
            "/{testnet_id}/outage/{node1}/{node2}",
            delete().to(netem::remove_outage),
        )
}

pub fn builds_routes() -> Scope {
    web::scope("/builds").route("/{build_id}/status", get().to(status::build_status))
}
