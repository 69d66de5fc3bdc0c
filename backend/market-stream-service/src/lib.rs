/// Market Stream Service Library
///
/// Real-time market data and alert fan-out:
/// - Kafka ingestion of arbitrage alerts and line movements
/// - Redis cache for latest prices and recent alerts
/// - Redis pub/sub bus between ingestion and live sessions
/// - WebSocket sessions for market data, alerts and the social feed
/// - Best-effort FCM push notifications
pub mod auth;
pub mod bus;
pub mod cache;
pub mod channels;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod redis_client;
pub mod routes;
pub mod services;
pub mod state;
pub mod websocket;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use state::AppState;
