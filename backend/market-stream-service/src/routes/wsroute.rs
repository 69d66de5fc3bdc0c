/// WebSocket upgrade endpoints
///
/// Each endpoint upgrades the connection, then hands the socket to the
/// session multiplexer on the worker's local executor.
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_ws::{CloseCode, CloseReason, Message};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;

use crate::auth::bearer_token;
use crate::state::AppState;
use crate::websocket::{
    run_session, InboundFrame, SessionTransport, StreamFlavor, TransportClosed, TransportError,
};

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// `actix_ws::Session` as a [`SessionTransport`]
#[derive(Clone)]
pub struct ActixTransport(actix_ws::Session);

#[async_trait(?Send)]
impl SessionTransport for ActixTransport {
    async fn send_text(&mut self, text: String) -> Result<(), TransportClosed> {
        self.0.text(text).await.map_err(|_| TransportClosed)
    }

    async fn ping(&mut self) -> Result<(), TransportClosed> {
        self.0.ping(b"").await.map_err(|_| TransportClosed)
    }

    async fn pong(&mut self, payload: &[u8]) -> Result<(), TransportClosed> {
        self.0.pong(payload).await.map_err(|_| TransportClosed)
    }

    async fn close(self, code: u16, reason: &str) {
        let reason = CloseReason {
            code: CloseCode::from(code),
            description: Some(reason.to_string()),
        };
        let _ = self.0.close(Some(reason)).await;
    }
}

fn inbound_frame(message: Message) -> InboundFrame {
    match message {
        Message::Text(text) => InboundFrame::Text(text.to_string()),
        Message::Ping(payload) => InboundFrame::Ping(payload.to_vec()),
        Message::Pong(_) => InboundFrame::Pong,
        Message::Close(_) => InboundFrame::Close,
        _ => InboundFrame::Other,
    }
}

/// `?token=` wins over the `Authorization` header: browsers cannot set
/// headers on a WebSocket handshake.
fn handshake_token(req: &HttpRequest) -> Option<String> {
    web::Query::<TokenQuery>::from_query(req.query_string())
        .ok()
        .and_then(|query| query.into_inner().token)
        .filter(|token| !token.trim().is_empty())
        .or_else(|| bearer_token(req))
}

async fn open_stream(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<AppState>,
    flavor: StreamFlavor,
) -> Result<HttpResponse, Error> {
    let token = handshake_token(&req);
    let (response, session, messages) = actix_ws::handle(&req, body)?;

    let ctx = state.session_context();
    let inbound = messages.map(|message| {
        message
            .map(inbound_frame)
            .map_err(|e| TransportError::Protocol(e.to_string()))
    });

    actix_web::rt::spawn(async move {
        run_session(ctx, flavor, token, ActixTransport(session), inbound).await;
    });

    Ok(response)
}

pub async fn market_stream(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    open_stream(req, body, state, StreamFlavor::Market).await
}

pub async fn alerts_stream(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    open_stream(req, body, state, StreamFlavor::Alerts).await
}

pub async fn social_stream(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    open_stream(req, body, state, StreamFlavor::Social).await
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/ws")
            .route("/market", web::get().to(market_stream))
            .route("/alerts", web::get().to(alerts_stream))
            .route("/social", web::get().to(social_stream)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_query_token_wins_over_header() {
        let req = TestRequest::default()
            .uri("/api/v1/ws/market?token=from-query")
            .insert_header(("Authorization", "Bearer from-header"))
            .to_http_request();
        assert_eq!(handshake_token(&req).as_deref(), Some("from-query"));

        let req = TestRequest::default()
            .uri("/api/v1/ws/market")
            .insert_header(("Authorization", "Bearer from-header"))
            .to_http_request();
        assert_eq!(handshake_token(&req).as_deref(), Some("from-header"));

        let req = TestRequest::default()
            .uri("/api/v1/ws/market?token=")
            .to_http_request();
        assert_eq!(handshake_token(&req), None);
    }

    #[test]
    fn test_inbound_frame_mapping() {
        assert_eq!(
            inbound_frame(Message::Text("hi".into())),
            InboundFrame::Text("hi".into())
        );
        assert_eq!(inbound_frame(Message::Close(None)), InboundFrame::Close);
        assert_eq!(inbound_frame(Message::Nop), InboundFrame::Other);
    }
}
