pub mod market;
pub mod ops;
pub mod wsroute;

use actix_web::web;

/// Client-facing API: sockets and cache pull paths
pub fn configure_public(cfg: &mut web::ServiceConfig) {
    wsroute::register_routes(cfg);
    market::register_routes(cfg);
}

/// Health, metrics and registry introspection for operators
pub fn configure_ops(cfg: &mut web::ServiceConfig) {
    ops::register_routes(cfg);
}
