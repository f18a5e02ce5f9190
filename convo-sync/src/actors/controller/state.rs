//! ControllerActor state
//!
//! The view is the only state the UI sees. It is rebuilt from bus events and
//! from the durable record of the active conversation, and re-published on
//! every change.

use std::sync::Arc;

use ractor::{ActorRef, RpcReplyPort};
use shared_types::{ConversationView, Message, ProcessingRecord, ProcessingStatus, Role};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::protocol::{ControllerSettings, ProcessOutcome};
use crate::actors::bus::MessageBusMsg;
use crate::actors::record_store::RecordStoreMsg;
use crate::similarity::SimilarityService;

pub struct ControllerState {
    pub(super) bus: ActorRef<MessageBusMsg>,
    pub(super) store: ActorRef<RecordStoreMsg>,
    pub(super) service: Arc<dyn SimilarityService>,
    pub(super) settings: ControllerSettings,
    pub(super) view: ConversationView,
    view_tx: watch::Sender<ConversationView>,
    /// Re-entrancy guard: at most one remote call per controller.
    pub(super) in_flight: Option<InFlightCall>,
    /// An automatic trigger arrived while a call was running.
    pub(super) auto_pending: bool,
}

pub(super) struct InFlightCall {
    pub conversation_id: String,
    pub content_hash: String,
    pub reply: Option<RpcReplyPort<ProcessOutcome>>,
    pub task: JoinHandle<()>,
}

/// Everything a remote call needs, taken from a view that passed the
/// readiness checks.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadyConversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
}

impl ControllerState {
    pub fn new(
        bus: ActorRef<MessageBusMsg>,
        store: ActorRef<RecordStoreMsg>,
        service: Arc<dyn SimilarityService>,
        settings: ControllerSettings,
    ) -> Self {
        let (view_tx, _) = watch::channel(ConversationView::default());
        Self {
            bus,
            store,
            service,
            settings,
            view: ConversationView::default(),
            view_tx,
            in_flight: None,
            auto_pending: false,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ConversationView> {
        self.view_tx.subscribe()
    }

    pub fn publish(&self) {
        self.view_tx.send_replace(self.view.clone());
    }

    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.view.conversation_id.as_deref() == Some(conversation_id)
    }

    pub fn in_flight_for(&self, conversation_id: &str) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|call| call.conversation_id == conversation_id)
    }
}

/// Readiness checks run before any remote work. `Err` carries the reason.
pub fn check_ready(
    view: &ConversationView,
    min_assistant_chars: usize,
) -> Result<ReadyConversation, String> {
    let id = view
        .conversation_id
        .clone()
        .ok_or_else(|| "no active conversation".to_string())?;
    let title = view
        .title
        .clone()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| "conversation title unknown".to_string())?;

    if view.messages.len() < 2 {
        return Err(format!(
            "need at least 2 messages, have {}",
            view.messages.len()
        ));
    }
    let Some(last) = view.messages.last() else {
        return Err("no messages".to_string());
    };
    if last.role != Role::Assistant {
        return Err("last message is not from the assistant".to_string());
    }
    if last.content.trim().chars().count() <= min_assistant_chars {
        return Err("assistant reply is too short".to_string());
    }

    Ok(ReadyConversation {
        id,
        title,
        messages: view.messages.clone(),
    })
}

/// Show what the durable record knows about the view's conversation.
pub fn apply_record(view: &mut ConversationView, record: &ProcessingRecord) {
    view.similar_users = record.similar_users.clone();
    view.processing_metadata =
        (record.status != ProcessingStatus::Idle).then(|| record.metadata());
    view.processing_error = match record.status {
        ProcessingStatus::Error => record.error.clone(),
        _ => None,
    };
}
