use dotenvy::dotenv;
use jsonwebtoken::Algorithm;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    /// Public port: WebSocket streams and market read endpoints
    pub port: u16,
    /// Internal port: health, metrics, connection ops
    pub ops_port: u16,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub alerts_topic: String,
    pub alerts_group: String,
    pub lines_topic: String,
    pub lines_group: String,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub algorithm: Algorithm,
}

#[derive(Debug, Clone, Default)]
pub struct FcmConfig {
    pub project_id: Option<String>,
    pub credentials_path: Option<String>,
}

impl FcmConfig {
    pub fn enabled(&self) -> bool {
        self.credentials_path.is_some()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// How often the server pings each socket
    pub heartbeat_interval: Duration,
    /// A socket silent for longer than this is closed
    pub client_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            client_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub auth: AuthConfig,
    pub fcm: FcmConfig,
    pub session: SessionConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; `from_env` passes the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let server = ServerConfig {
            host: var("HOST", "0.0.0.0"),
            port: parse_num(&lookup, "PORT", 8000)?,
            ops_port: parse_num(&lookup, "OPS_PORT", 9090)?,
        };

        let redis = RedisConfig {
            url: var("REDIS_URL", "redis://127.0.0.1:6379/0"),
        };

        let kafka = KafkaConfig {
            brokers: var("KAFKA_BROKERS", "localhost:9092"),
            alerts_topic: var("KAFKA_TOPIC_ALERTS", "arbitrage-alerts"),
            alerts_group: var("KAFKA_GROUP_ALERTS", "arbitrage-alert-workers"),
            lines_topic: var("KAFKA_TOPIC_LINES", "line-movements"),
            lines_group: var("KAFKA_GROUP_LINES", "line-movement-workers"),
        };

        let jwt_secret =
            optional("JWT_SECRET").ok_or_else(|| AppError::Config("JWT_SECRET missing".into()))?;
        let algorithm = parse_algorithm(&var("JWT_ALGORITHM", "HS256"))?;

        let fcm = FcmConfig {
            project_id: optional("FCM_PROJECT_ID"),
            credentials_path: optional("FCM_CREDENTIALS_PATH"),
        };

        let session = SessionConfig {
            heartbeat_interval: Duration::from_secs(parse_num(
                &lookup,
                "WS_HEARTBEAT_INTERVAL_SECS",
                5,
            )?),
            client_timeout: Duration::from_secs(parse_num(&lookup, "WS_CLIENT_TIMEOUT_SECS", 30)?),
        };

        if session.heartbeat_interval.is_zero() || session.client_timeout.is_zero() {
            return Err(AppError::Config(
                "WS_HEARTBEAT_INTERVAL_SECS and WS_CLIENT_TIMEOUT_SECS must be non-zero".into(),
            ));
        }
        if session.client_timeout <= session.heartbeat_interval {
            return Err(AppError::Config(
                "WS_CLIENT_TIMEOUT_SECS must exceed WS_HEARTBEAT_INTERVAL_SECS".into(),
            ));
        }

        Ok(Self {
            server,
            redis,
            kafka,
            auth: AuthConfig {
                jwt_secret,
                algorithm,
            },
            fcm,
            session,
        })
    }
}

fn parse_num<F, T>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{key} must be a number, got {raw:?}"))),
        None => Ok(default),
    }
}

/// Tokens are verified with a shared secret, so only the HMAC family applies.
fn parse_algorithm(raw: &str) -> Result<Algorithm, AppError> {
    match Algorithm::from_str(raw.trim()) {
        Ok(alg @ (Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)) => Ok(alg),
        _ => Err(AppError::Config(format!(
            "JWT_ALGORITHM must be HS256, HS384 or HS512, got {raw:?}"
        ))),
    }
}
