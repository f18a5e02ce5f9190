//! Remote similarity service.
//!
//! The service embeds a conversation, upserts it under its id and returns
//! the users whose conversations are closest. The call is idempotent but
//! slow and fallible; timeouts and retries are the controller's business.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared_types::{Message, SimilarUserMatch};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SimilarityError {
    #[error("similarity service is not configured")]
    NotConfigured,
    #[error("request failed: {0}")]
    Http(String),
    #[error("similarity service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response: {0}")]
    Decode(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

#[async_trait]
pub trait SimilarityService: Send + Sync + 'static {
    async fn upsert_conversation(
        &self,
        id: &str,
        title: &str,
        content: &str,
    ) -> Result<Vec<SimilarUserMatch>, SimilarityError>;
}

/// Wire form of a snapshot sent as `content`.
pub fn serialize_snapshot(messages: &[Message]) -> Result<String, SimilarityError> {
    serde_json::to_string(messages).map_err(|e| SimilarityError::InvalidRequest(e.to_string()))
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    id: &'a str,
    title: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UpsertResponse {
    Wrapped { similar_users: Vec<SimilarUserMatch> },
    Bare(Vec<SimilarUserMatch>),
}

impl UpsertResponse {
    fn into_matches(self) -> Vec<SimilarUserMatch> {
        let matches = match self {
            UpsertResponse::Wrapped { similar_users } => similar_users,
            UpsertResponse::Bare(matches) => matches,
        };
        matches
            .into_iter()
            .map(|mut m| {
                if !(0.0..=1.0).contains(&m.distance) {
                    tracing::warn!(
                        user_id = %m.user_id,
                        distance = m.distance,
                        "Clamping out-of-range similarity distance"
                    );
                    m.distance = if m.distance.is_nan() {
                        1.0
                    } else {
                        m.distance.clamp(0.0, 1.0)
                    };
                }
                m
            })
            .collect()
    }
}

/// JSON-over-HTTP client: `POST {base_url}/conversations/upsert`.
#[derive(Debug, Clone)]
pub struct HttpSimilarityClient {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpSimilarityClient {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SimilarityError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SimilarityError::Http(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/conversations/upsert", base_url.trim_end_matches('/')),
            token,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SimilarityService for HttpSimilarityClient {
    async fn upsert_conversation(
        &self,
        id: &str,
        title: &str,
        content: &str,
    ) -> Result<Vec<SimilarUserMatch>, SimilarityError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&UpsertRequest { id, title, content });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SimilarityError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SimilarityError::Status {
                status: status.as_u16(),
                body: body.chars().take(512).collect(),
            });
        }

        let parsed: UpsertResponse = response
            .json()
            .await
            .map_err(|e| SimilarityError::Decode(e.to_string()))?;
        Ok(parsed.into_matches())
    }
}

/// Stand-in used when no service URL is configured; every call fails so the
/// controller records an error the UI can show.
#[derive(Debug, Default, Clone)]
pub struct UnconfiguredSimilarityService;

#[async_trait]
impl SimilarityService for UnconfiguredSimilarityService {
    async fn upsert_conversation(
        &self,
        _id: &str,
        _title: &str,
        _content: &str,
    ) -> Result<Vec<SimilarUserMatch>, SimilarityError> {
        Err(SimilarityError::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn match_json(distance: f64) -> serde_json::Value {
        json!({
            "user_id": "u-2",
            "user_name": "Robin",
            "conversation_id": "c-9",
            "title": "Bread",
            "distance": distance,
            "created_at": "2026-01-31T02:24:30Z",
            "meets_threshold": distance < 0.3
        })
    }

    #[test]
    fn test_response_accepts_wrapped_and_bare_lists() {
        let wrapped: UpsertResponse =
            serde_json::from_value(json!({"similar_users": [match_json(0.1)]})).unwrap();
        assert_eq!(wrapped.into_matches().len(), 1);

        let bare: UpsertResponse = serde_json::from_value(json!([])).unwrap();
        assert!(bare.into_matches().is_empty());
    }

    #[test]
    fn test_out_of_range_distance_is_clamped() {
        let parsed: UpsertResponse =
            serde_json::from_value(json!([match_json(1.7), match_json(-0.2)])).unwrap();
        let matches = parsed.into_matches();
        assert_eq!(matches[0].distance, 1.0);
        assert_eq!(matches[1].distance, 0.0);
    }

    #[test]
    fn test_snapshot_serialization_keeps_order() {
        let content =
            serialize_snapshot(&[Message::user("hi"), Message::assistant("hello")]).unwrap();
        assert_eq!(
            content,
            r#"[{"role":"user","content":"hi"},{"role":"assistant","content":"hello"}]"#
        );
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let client =
            HttpSimilarityClient::new("http://localhost:9000/", None, Duration::from_secs(1))
                .unwrap();
        assert_eq!(client.endpoint(), "http://localhost:9000/conversations/upsert");
    }

    #[tokio::test]
    async fn test_unconfigured_service_always_fails() {
        let err = UnconfiguredSimilarityService
            .upsert_conversation("c-1", "t", "[]")
            .await
            .unwrap_err();
        assert_eq!(err, SimilarityError::NotConfigured);
    }
}
