/// FCM push library
///
/// Firebase Cloud Messaging (HTTP v1) client used by the market stream
/// service to deliver price and arbitrage alerts to mobile devices.
///
/// It handles:
/// - OAuth2 access tokens minted from a Google service account, cached until near expiry
/// - Topic messages (broadcast alerts, per-symbol and per-user topics)
pub mod client;
pub mod errors;
pub mod models;

pub use client::FcmClient;
pub use errors::FcmError;
pub use models::{FcmSendResult, PushNotification, ServiceAccountKey};
