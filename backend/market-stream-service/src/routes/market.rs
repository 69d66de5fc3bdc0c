/// Pull endpoints over the event cache, for clients that poll instead of
/// holding a socket open.
use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;

use crate::auth::{bearer_token, Identity};
use crate::error::{AppError, AppResult};
use crate::events::normalize_symbol;
use crate::state::AppState;

fn authenticate(req: &HttpRequest, state: &AppState) -> AppResult<Identity> {
    let token = bearer_token(req).ok_or(AppError::Unauthorized)?;
    Ok(state.decoder.decode(&token)?)
}

/// Latest cached snapshot for a symbol
///
/// Endpoint: GET /api/v1/market/quote/{symbol}
pub async fn get_quote(
    req: HttpRequest,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    authenticate(&req, &state)?;

    let symbol = normalize_symbol(&path.into_inner());
    if symbol.is_empty() {
        return Err(AppError::BadRequest("symbol is required".into()));
    }

    let quote = state
        .cache
        .latest_price(&symbol)
        .await?
        .ok_or(AppError::NotFound)?;

    Ok(HttpResponse::Ok().json(quote))
}

/// Recent arbitrage alerts, newest first
///
/// Endpoint: GET /api/v1/market/alerts/arbitrage
pub async fn recent_arbitrage(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    authenticate(&req, &state)?;

    let alerts = state.cache.recent_arbitrage().await?;
    Ok(HttpResponse::Ok().json(json!({
        "count": alerts.len(),
        "alerts": alerts,
    })))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/market")
            .route("/quote/{symbol}", web::get().to(get_quote))
            .route("/alerts/arbitrage", web::get().to(recent_arbitrage)),
    );
}
