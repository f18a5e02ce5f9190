//! Shared types between the sync contexts and the UI
//!
//! These types are used by:
//! - the observer, coordinator and controller actors (native Rust)
//! - any web UI rendering the controller's published view (via generated TS)
//!
//! Serializable with serde for JSON over the message bus, the durable store
//! and HTTP.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ============================================================================
// Conversation Snapshot
// ============================================================================

/// Author of a chat message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message of a conversation snapshot.
///
/// An ordered `Vec<Message>` is a snapshot; snapshots are never edited in
/// place, a new mutation of the foreign document produces a new one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, TS)]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

// ============================================================================
// Similarity Results
// ============================================================================

/// Another user whose conversation is close to the current one.
///
/// `distance` is a dissimilarity in `[0, 1]` (0 = identical). `meets_threshold`
/// is computed by the similarity service and displayed as-is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct SimilarUserMatch {
    pub user_id: String,
    pub user_name: String,
    pub conversation_id: String,
    pub title: String,
    pub distance: f64,
    pub created_at: DateTime<Utc>,
    pub meets_threshold: bool,
}

// ============================================================================
// Processing Record (durable, one per conversation id)
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub enum ProcessingStatus {
    #[default]
    Idle,
    Processing,
    Completed,
    Error,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Idle => "idle",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "idle" => Some(ProcessingStatus::Idle),
            "processing" => Some(ProcessingStatus::Processing),
            "completed" => Some(ProcessingStatus::Completed),
            "error" => Some(ProcessingStatus::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted processing state of one conversation.
///
/// Transitions go through [`ProcessingRecord::begin`] and then exactly one of
/// [`ProcessingRecord::complete`] / [`ProcessingRecord::fail`]. The terminal
/// transitions refuse any receiver that is not `Processing`, so a terminal
/// state always carries the fingerprint of the attempt that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct ProcessingRecord {
    pub id: String,
    pub status: ProcessingStatus,
    pub content_hash: Option<String>,
    pub last_processed: Option<DateTime<Utc>>,
    pub similar_users: Option<Vec<SimilarUserMatch>>,
    pub error: Option<String>,
}

impl ProcessingRecord {
    /// Fresh record for a conversation that has never been processed.
    pub fn idle(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: ProcessingStatus::Idle,
            content_hash: None,
            last_processed: None,
            similar_users: None,
            error: None,
        }
    }

    /// True when this record already holds a terminal outcome for `hash`.
    ///
    /// Terminal states only count for their own fingerprint; any other hash
    /// makes the conversation eligible again.
    pub fn is_settled_for(&self, hash: &str) -> bool {
        matches!(
            self.status,
            ProcessingStatus::Completed | ProcessingStatus::Error
        ) && self.content_hash.as_deref() == Some(hash)
    }

    /// Record an attempt for `hash`. Previous results stay visible while the
    /// call is running.
    pub fn begin(&self, hash: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: self.id.clone(),
            status: ProcessingStatus::Processing,
            content_hash: Some(hash.into()),
            last_processed: Some(now),
            similar_users: self.similar_users.clone(),
            error: None,
        }
    }

    /// Settle the running attempt with its results.
    pub fn complete(
        &self,
        matches: Vec<SimilarUserMatch>,
        now: DateTime<Utc>,
    ) -> Result<Self, TransitionError> {
        self.expect_processing()?;
        Ok(Self {
            id: self.id.clone(),
            status: ProcessingStatus::Completed,
            content_hash: self.content_hash.clone(),
            last_processed: Some(now),
            similar_users: Some(matches),
            error: None,
        })
    }

    /// Record a failed attempt; stale results are cleared.
    pub fn fail(
        &self,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, TransitionError> {
        self.expect_processing()?;
        Ok(Self {
            id: self.id.clone(),
            status: ProcessingStatus::Error,
            content_hash: self.content_hash.clone(),
            last_processed: Some(now),
            similar_users: None,
            error: Some(error.into()),
        })
    }

    fn expect_processing(&self) -> Result<(), TransitionError> {
        if self.status == ProcessingStatus::Processing && self.content_hash.is_some() {
            Ok(())
        } else {
            Err(TransitionError {
                id: self.id.clone(),
                status: self.status,
            })
        }
    }

    pub fn metadata(&self) -> ProcessingMetadata {
        ProcessingMetadata {
            last_processed_hash: self.content_hash.clone(),
            last_processed_at: self.last_processed,
            error: self.error.clone(),
        }
    }
}

/// A terminal transition requested on a record with no attempt running.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("record {id} is {status}, not processing")]
pub struct TransitionError {
    pub id: String,
    pub status: ProcessingStatus,
}

// ============================================================================
// UI State
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default, TS)]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct ProcessingMetadata {
    pub last_processed_hash: Option<String>,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Reactive state the controller publishes for the UI.
///
/// Every field is derived from bus events and the durable record of the
/// active conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default, TS)]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct ConversationView {
    pub conversation_id: Option<String>,
    pub title: Option<String>,
    pub messages: Vec<Message>,
    pub is_loading: bool,
    pub similar_users: Option<Vec<SimilarUserMatch>>,
    pub content_hash: Option<String>,
    pub processing_metadata: Option<ProcessingMetadata>,
    pub processing_error: Option<String>,
}

impl ConversationView {
    pub fn display(&self) -> DisplayState {
        if self.conversation_id.is_none() {
            return DisplayState::NoConversation;
        }
        if self.is_loading {
            return DisplayState::Loading;
        }
        if let Some(message) = &self.processing_error {
            return DisplayState::Error {
                message: message.clone(),
                retryable: true,
            };
        }
        match &self.similar_users {
            Some(users) if users.is_empty() => DisplayState::Empty,
            Some(users) => DisplayState::Results {
                users: users.clone(),
            },
            None => DisplayState::Waiting,
        }
    }
}

/// What the UI should render for a view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(tag = "state", rename_all = "snake_case")]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub enum DisplayState {
    NoConversation,
    Waiting,
    Loading,
    Results { users: Vec<SimilarUserMatch> },
    Empty,
    Error { message: String, retryable: bool },
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ts_rs::Config;

    fn sample_match() -> SimilarUserMatch {
        SimilarUserMatch {
            user_id: "u-2".to_string(),
            user_name: "Robin".to_string(),
            conversation_id: "c-9".to_string(),
            title: "Sourdough hydration".to_string(),
            distance: 0.12,
            created_at: Utc::now(),
            meets_threshold: true,
        }
    }

    #[test]
    fn test_message_serialization() {
        let json = serde_json::to_value(Message::assistant("hello")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "assistant", "content": "hello"}));
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            ProcessingStatus::Idle,
            ProcessingStatus::Processing,
            ProcessingStatus::Completed,
            ProcessingStatus::Error,
        ] {
            assert_eq!(ProcessingStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ProcessingStatus::parse("done"), None);
    }

    #[test]
    fn test_record_transitions_pass_through_processing() {
        let now = Utc::now();
        let idle = ProcessingRecord::idle("c-1");
        assert!(!idle.is_settled_for("h1"));

        let processing = idle.begin("h1", now);
        assert_eq!(processing.status, ProcessingStatus::Processing);
        assert_eq!(processing.content_hash.as_deref(), Some("h1"));
        assert!(!processing.is_settled_for("h1"));

        let done = processing.complete(vec![], now).unwrap();
        assert_eq!(done.status, ProcessingStatus::Completed);
        assert_eq!(done.similar_users, Some(vec![]));
        assert!(done.is_settled_for("h1"));
        assert!(!done.is_settled_for("h2"));
    }

    #[test]
    fn test_terminal_transitions_require_processing() {
        let now = Utc::now();
        let idle = ProcessingRecord::idle("c-1");

        let err = idle.complete(vec![], now).unwrap_err();
        assert_eq!(err.status, ProcessingStatus::Idle);
        assert_eq!(err.id, "c-1");
        assert!(idle.fail("boom", now).is_err());

        let done = idle.begin("h1", now).complete(vec![], now).unwrap();
        assert_eq!(
            done.fail("late", now).unwrap_err().status,
            ProcessingStatus::Completed
        );
        assert!(done.complete(vec![], now).is_err());
    }

    #[test]
    fn test_failed_record_clears_stale_results() {
        let now = Utc::now();
        let completed = ProcessingRecord::idle("c-1")
            .begin("h1", now)
            .complete(vec![sample_match()], now)
            .unwrap();

        let retry = completed.begin("h2", now);
        assert_eq!(retry.similar_users.as_ref().map(Vec::len), Some(1));

        let failed = retry.fail("timeout after 30000ms", now).unwrap();
        assert_eq!(failed.status, ProcessingStatus::Error);
        assert_eq!(failed.content_hash.as_deref(), Some("h2"));
        assert!(failed.similar_users.is_none());
        assert!(failed.is_settled_for("h2"));
        assert!(!failed.is_settled_for("h1"));
    }

    #[test]
    fn test_view_display_states() {
        let mut view = ConversationView::default();
        assert_eq!(view.display(), DisplayState::NoConversation);

        view.conversation_id = Some("c-1".to_string());
        assert_eq!(view.display(), DisplayState::Waiting);

        view.is_loading = true;
        assert_eq!(view.display(), DisplayState::Loading);

        view.is_loading = false;
        view.similar_users = Some(vec![]);
        assert_eq!(view.display(), DisplayState::Empty);

        view.similar_users = Some(vec![sample_match()]);
        assert!(matches!(view.display(), DisplayState::Results { users } if users.len() == 1));

        view.processing_error = Some("boom".to_string());
        assert_eq!(
            view.display(),
            DisplayState::Error {
                message: "boom".to_string(),
                retryable: true
            }
        );
    }

    #[test]
    fn test_display_state_is_tagged() {
        let json = serde_json::to_value(DisplayState::Empty).unwrap();
        assert_eq!(json, serde_json::json!({"state": "empty"}));
    }

    #[test]
    fn export_types() {
        // The export_to attribute in each type's #[ts] macro specifies the output file
        let config = Config::default();
        Role::export(&config).unwrap();
        Message::export(&config).unwrap();
        SimilarUserMatch::export(&config).unwrap();
        ProcessingStatus::export(&config).unwrap();
        ProcessingRecord::export(&config).unwrap();
        ProcessingMetadata::export(&config).unwrap();
        ConversationView::export(&config).unwrap();
        DisplayState::export(&config).unwrap();
    }
}
