/// Internal endpoints, served on the ops port only
use actix_web::{web, HttpResponse};
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::events::UserId;
use crate::metrics;
use crate::state::AppState;

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "service": "market-stream-service",
    }))
}

/// Endpoint: GET /internal/v1/ws/status/{user_id}
pub async fn ws_status(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let user_id = UserId::from(path.into_inner());
    let connection_count = state.registry.connection_count(&user_id);

    Ok(HttpResponse::Ok().json(json!({
        "user_id": user_id,
        "connected": connection_count > 0,
        "connection_count": connection_count,
    })))
}

/// Endpoint: GET /internal/v1/ws/stats
pub async fn ws_stats(state: web::Data<AppState>) -> HttpResponse {
    let registry = &state.registry;
    let total_connections = registry.session_count();
    let connected_users = registry.user_count();

    HttpResponse::Ok().json(json!({
        "total_connections": total_connections,
        "connected_users": connected_users,
        "subscribed_symbols": registry.symbol_count(),
        "average_connections_per_user": if connected_users > 0 {
            total_connections as f64 / connected_users as f64
        } else {
            0.0
        },
    }))
}

/// Push a JSON frame, unchanged, to every live session of a user
///
/// Endpoint: POST /internal/v1/ws/notify/{user_id}
pub async fn notify_user(
    path: web::Path<String>,
    state: web::Data<AppState>,
    body: web::Json<Value>,
) -> AppResult<HttpResponse> {
    let user_id = UserId::from(path.into_inner());
    if user_id.as_str().is_empty() {
        return Err(AppError::BadRequest("user id is required".into()));
    }

    let payload = body.into_inner().to_string();
    let report = state.registry.publish_to_user(&user_id, &payload);

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "user_id": user_id,
        "delivered": report.delivered,
        "evicted": report.evicted,
    })))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics::serve_metrics))
        .service(
            web::scope("/internal/v1/ws")
                .route("/status/{user_id}", web::get().to(ws_status))
                .route("/stats", web::get().to(ws_stats))
                .route("/notify/{user_id}", web::post().to(notify_user)),
        );
}
