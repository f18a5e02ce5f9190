//! ControllerActor message protocol

use std::time::Duration;

use ractor::RpcReplyPort;
use serde::Serialize;
use shared_types::{ConversationView, SimilarUserMatch};
use tokio::sync::watch;

use crate::actors::bus::Envelope;
use crate::config::Config;

#[derive(Debug)]
pub enum ControllerMsg {
    Bus(Envelope),
    /// Run one processing attempt for the active conversation. `reply` is
    /// `None` for automatic triggers.
    ProcessConversation {
        force_refresh: bool,
        reply: Option<RpcReplyPort<ProcessOutcome>>,
    },
    /// Result of the spawned remote call.
    RemoteCallFinished {
        conversation_id: String,
        content_hash: String,
        result: Result<Vec<SimilarUserMatch>, String>,
    },
    GetView {
        reply: RpcReplyPort<ConversationView>,
    },
    Subscribe {
        reply: RpcReplyPort<watch::Receiver<ConversationView>>,
    },
}

impl From<Envelope> for ControllerMsg {
    fn from(envelope: Envelope) -> Self {
        ControllerMsg::Bus(envelope)
    }
}

/// What one `ProcessConversation` did. Informational only: every outcome is
/// also reflected in the published view and the durable record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    Skipped { reason: SkipReason },
    Completed { matches: Vec<SimilarUserMatch> },
    Failed { error: String },
}

impl ProcessOutcome {
    pub fn skipped(reason: SkipReason) -> Self {
        ProcessOutcome::Skipped { reason }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ProcessOutcome::Skipped { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    /// Another remote call is running.
    InFlight,
    /// The conversation is not ready to be processed yet.
    NotReady(String),
    /// The record already holds a terminal result for this content.
    UpToDate,
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Upper bound on one remote call
    pub remote_timeout: Duration,
    /// The last assistant message must be longer than this, trimmed
    pub min_assistant_chars: usize,
    /// Process on its own when the active content or title changes
    pub auto_process: bool,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ControllerSettings {
    fn from(config: &Config) -> Self {
        Self {
            remote_timeout: config.remote_timeout,
            min_assistant_chars: config.min_assistant_chars,
            auto_process: config.auto_process,
        }
    }
}
