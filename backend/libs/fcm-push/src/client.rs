use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::errors::FcmError;
use crate::models::*;

const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const FCM_BASE_URL: &str = "https://fcm.googleapis.com";

/// Refresh the cached access token this many seconds before it expires.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// Firebase Cloud Messaging client
///
/// Manages OAuth2 token generation, caching, and message delivery.
/// Cloning is cheap and clones share the token cache.
#[derive(Clone)]
pub struct FcmClient {
    project_id: String,
    credentials: Arc<ServiceAccountKey>,
    token_cache: Arc<Mutex<Option<TokenCache>>>,
    http_client: reqwest::Client,
    base_url: String,
}

impl FcmClient {
    /// Create new FCM client
    ///
    /// # Arguments
    /// * `project_id` - Firebase project ID
    /// * `credentials` - Service account key with OAuth2 credentials
    pub fn new(project_id: String, credentials: ServiceAccountKey) -> Self {
        Self {
            project_id,
            credentials: Arc::new(credentials),
            token_cache: Arc::new(Mutex::new(None)),
            http_client: reqwest::Client::new(),
            base_url: FCM_BASE_URL.to_string(),
        }
    }

    /// Load a service account JSON file.
    ///
    /// `project_id` falls back to the one recorded in the key file.
    pub fn from_service_account_file(
        path: impl AsRef<Path>,
        project_id: Option<String>,
    ) -> Result<Self, FcmError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| FcmError::Credentials(format!("{}: {}", path.display(), e)))?;
        let credentials: ServiceAccountKey = serde_json::from_str(&raw)
            .map_err(|e| FcmError::Credentials(format!("{}: {}", path.display(), e)))?;

        let project_id = project_id
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| credentials.project_id.clone());

        Ok(Self::new(project_id, credentials))
    }

    /// Point the client at a different FCM host (emulators, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Send notification to all devices subscribed to `topic`
    pub async fn send_to_topic(
        &self,
        topic: &str,
        notification: &PushNotification,
    ) -> Result<FcmSendResult, FcmError> {
        validate_topic(topic)?;
        let access_token = self.access_token().await?;

        let message = FcmMessage {
            message: FcmMessageContent {
                topic,
                notification: FcmNotification {
                    title: &notification.title,
                    body: &notification.body,
                },
                data: &notification.data,
            },
        };

        let url = format!(
            "{}/v1/projects/{}/messages:send",
            self.base_url, self.project_id
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&access_token)
            .json(&message)
            .send()
            .await
            .map_err(|e| FcmError::SendRequestError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(FcmError::ApiError(status.to_string(), error_text));
        }

        let fcm_response: FcmApiResponse = response
            .json()
            .await
            .map_err(|e| FcmError::ResponseParseError(e.to_string()))?;

        let message_id = fcm_response
            .name
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        debug!(message_id = %message_id, topic = %topic, "FCM message accepted");

        Ok(FcmSendResult { message_id })
    }

    /// Get an access token for the service account, minting a new one when
    /// the cached token is missing or about to expire.
    pub async fn access_token(&self) -> Result<String, FcmError> {
        let mut cache = self.token_cache.lock().await;

        if let Some(cached) = cache.as_ref() {
            if cached.expires_at > Utc::now().timestamp() + TOKEN_REFRESH_MARGIN_SECS {
                return Ok(cached.access_token.clone());
            }
        }

        let assertion = self.signed_assertion()?;
        let params = [
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", assertion.as_str()),
        ];

        let response = self
            .http_client
            .post(&self.credentials.token_uri)
            .form(&params)
            .send()
            .await
            .map_err(|e| FcmError::TokenError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FcmError::TokenRequestFailed(response.status().to_string()));
        }

        let token_response: GoogleTokenResponse = response
            .json()
            .await
            .map_err(|e| FcmError::TokenParseError(e.to_string()))?;

        *cache = Some(TokenCache {
            access_token: token_response.access_token.clone(),
            expires_at: Utc::now().timestamp() + token_response.expires_in,
        });

        Ok(token_response.access_token)
    }

    fn signed_assertion(&self) -> Result<String, FcmError> {
        let now = Utc::now();
        let claims = JwtClaims {
            iss: self.credentials.client_email.clone(),
            sub: self.credentials.client_email.clone(),
            scope: FCM_SCOPE.to_string(),
            aud: self.credentials.token_uri.clone(),
            exp: (now + Duration::hours(1)).timestamp(),
            iat: now.timestamp(),
        };

        let encoding_key = EncodingKey::from_rsa_pem(self.credentials.private_key.as_bytes())
            .map_err(|e| FcmError::KeyParseError(e.to_string()))?;

        let mut header = Header::new(Algorithm::RS256);
        if !self.credentials.private_key_id.is_empty() {
            header.kid = Some(self.credentials.private_key_id.clone());
        }

        encode(&header, &claims, &encoding_key).map_err(|e| FcmError::JwtEncodeError(e.to_string()))
    }
}

/// FCM topic names must match `[a-zA-Z0-9-_.~%]+`.
pub fn validate_topic(topic: &str) -> Result<(), FcmError> {
    let valid = !topic.is_empty()
        && topic
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~' | '%'));

    if valid {
        Ok(())
    } else {
        Err(FcmError::InvalidTopic(topic.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_credentials() -> ServiceAccountKey {
        ServiceAccountKey {
            project_id: "test-project".to_string(),
            private_key_id: "key-id".to_string(),
            private_key: "not-a-pem-key".to_string(),
            client_email: "push@test-project.iam.gserviceaccount.com".to_string(),
            client_id: "123456".to_string(),
            token_uri: "https://oauth2.googleapis.com/token".to_string(),
        }
    }

    #[test]
    fn test_fcm_client_creation() {
        let client = FcmClient::new("test-project".to_string(), test_credentials());
        assert_eq!(client.project_id(), "test-project");
    }

    #[test]
    fn test_validate_topic() {
        assert!(validate_topic("arbitrage_alerts").is_ok());
        assert!(validate_topic("symbol_aapl").is_ok());
        assert!(validate_topic("user_42").is_ok());
        assert!(validate_topic("").is_err());
        assert!(validate_topic("symbol aapl").is_err());
        assert!(validate_topic("symbol/aapl").is_err());
    }

    #[test]
    fn test_from_missing_service_account_file() {
        let result = FcmClient::from_service_account_file("/nonexistent/firebase.json", None);
        assert!(matches!(result, Err(FcmError::Credentials(_))));
    }

    #[test]
    fn test_from_service_account_file_uses_key_project() {
        let path = std::env::temp_dir().join(format!("fcm-push-{}.json", Uuid::new_v4()));
        let key = serde_json::to_string(&test_credentials()).unwrap();
        std::fs::write(&path, key).unwrap();

        let client = FcmClient::from_service_account_file(&path, None).unwrap();
        assert_eq!(client.project_id(), "test-project");

        let client =
            FcmClient::from_service_account_file(&path, Some("override".to_string())).unwrap();
        assert_eq!(client.project_id(), "override");

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_invalid_topic_rejected_before_network() {
        let client = FcmClient::new("test-project".to_string(), test_credentials());
        let notification = PushNotification::new("title", "body");

        let result = client.send_to_topic("not a topic", &notification).await;
        assert!(matches!(result, Err(FcmError::InvalidTopic(_))));
    }

    #[tokio::test]
    async fn test_bad_private_key_fails_locally() {
        let client = FcmClient::new("test-project".to_string(), test_credentials());
        let err = client.access_token().await.unwrap_err();
        assert!(matches!(err, FcmError::KeyParseError(_)));
    }

    async fn client_with_cached_token(server: &MockServer) -> FcmClient {
        let client = FcmClient::new("test-project".to_string(), test_credentials())
            .with_base_url(server.uri());
        *client.token_cache.lock().await = Some(TokenCache {
            access_token: "cached-token".to_string(),
            expires_at: Utc::now().timestamp() + 3600,
        });
        client
    }

    #[tokio::test]
    async fn test_send_to_topic_posts_v1_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/test-project/messages:send"))
            .and(header("authorization", "Bearer cached-token"))
            .and(body_partial_json(serde_json::json!({
                "message": {
                    "topic": "symbol_aapl",
                    "notification": {"title": "AAPL Alert", "body": "moved"},
                    "data": {"type": "price_alert"}
                }
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"name": "projects/test-project/messages/1"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with_cached_token(&server).await;
        let notification =
            PushNotification::new("AAPL Alert", "moved").with_data("type", "price_alert");

        let result = client
            .send_to_topic("symbol_aapl", &notification)
            .await
            .unwrap();
        assert_eq!(result.message_id, "projects/test-project/messages/1");
    }

    #[tokio::test]
    async fn test_send_to_topic_surfaces_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("unknown topic"))
            .mount(&server)
            .await;

        let client = client_with_cached_token(&server).await;
        let notification = PushNotification::new("title", "body");

        let err = client
            .send_to_topic("user_42", &notification)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FcmError::ApiError(status, body) if status.starts_with("404") && body == "unknown topic"
        ));
    }
}
