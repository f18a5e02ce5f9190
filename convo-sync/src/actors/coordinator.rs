//! CoordinatorActor - relay between Observer and Controller
//!
//! Keeps a best-effort cache of the active conversation (id and title),
//! forwards Observer events to the Controller as `ConversationChanged`, and
//! answers `GetActiveState` for a Controller that starts after the Observer.
//! Content hashes are relayed, never stored here.

use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};

use crate::actors::bus::{
    self, Context, ConversationChanged, Envelope, MessageBusMsg, RequestContentExtraction,
    CONTENT_CHANGED, CONVERSATION_CHANGED, GET_ACTIVE_STATE, INITIAL_CONTENT, NAVIGATED,
    REQUEST_CONTENT_EXTRACTION, TITLE_UPDATED,
};

#[derive(Debug, Default)]
pub struct CoordinatorActor;

#[derive(Debug, Clone)]
pub struct CoordinatorArguments {
    pub bus: ActorRef<MessageBusMsg>,
}

pub struct CoordinatorState {
    bus: ActorRef<MessageBusMsg>,
    active: ActiveConversation,
}

/// Cached identity of the conversation the document shows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveConversation {
    pub id: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug)]
pub enum CoordinatorMsg {
    Bus(Envelope),
    GetActive {
        reply: RpcReplyPort<ActiveConversation>,
    },
}

impl From<Envelope> for CoordinatorMsg {
    fn from(envelope: Envelope) -> Self {
        CoordinatorMsg::Bus(envelope)
    }
}

#[async_trait]
impl Actor for CoordinatorActor {
    type Msg = CoordinatorMsg;
    type State = CoordinatorState;
    type Arguments = CoordinatorArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            actor_id = %myself.get_id(),
            "CoordinatorActor starting"
        );
        bus::subscribe(&args.bus, Context::Coordinator, myself.clone())
            .map_err(|e| ActorProcessingErr::from(format!("Failed to subscribe to bus: {e}")))?;

        Ok(CoordinatorState {
            bus: args.bus,
            active: ActiveConversation::default(),
        })
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        _state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!(
            actor_id = %myself.get_id(),
            "CoordinatorActor started successfully"
        );
        Ok(())
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            CoordinatorMsg::Bus(envelope) => self.handle_envelope(&envelope, state),
            CoordinatorMsg::GetActive { reply } => {
                let _ = reply.send(state.active.clone());
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Err(e) = bus::unsubscribe(&state.bus, Context::Coordinator, myself.get_id()) {
            tracing::debug!(error = %e, "Bus already gone at shutdown");
        }
        tracing::info!(
            actor_id = %myself.get_id(),
            "CoordinatorActor stopped"
        );
        Ok(())
    }
}

impl CoordinatorActor {
    fn handle_envelope(&self, envelope: &Envelope, state: &mut CoordinatorState) {
        if let Some(initial) = INITIAL_CONTENT.accept(envelope) {
            self.relay_content(initial.id, initial.snapshot, initial.hash, state);
        } else if let Some(changed) = CONTENT_CHANGED.accept(envelope) {
            self.relay_content(changed.id, changed.snapshot, changed.hash, state);
        } else if let Some(navigated) = NAVIGATED.accept(envelope) {
            tracing::debug!(
                conversation_id = %navigated.id,
                title = ?navigated.title,
                "Active conversation changed"
            );
            state.active = ActiveConversation {
                id: Some(navigated.id.clone()),
                title: navigated.title.clone(),
            };
            CONVERSATION_CHANGED.dispatch(
                &state.bus,
                ConversationChanged {
                    id: navigated.id,
                    snapshot: None,
                    hash: None,
                    title: navigated.title,
                },
            );
        } else if let Some(updated) = TITLE_UPDATED.accept(envelope) {
            match state.active.id.as_deref() {
                Some(active) if active != updated.id => {
                    tracing::debug!(
                        conversation_id = %updated.id,
                        "Title update for inactive conversation relayed without caching"
                    );
                }
                _ => {
                    state.active.id = Some(updated.id.clone());
                    state.active.title = Some(updated.title.clone());
                }
            }
            CONVERSATION_CHANGED.dispatch(
                &state.bus,
                ConversationChanged {
                    id: updated.id,
                    snapshot: None,
                    hash: None,
                    title: Some(updated.title),
                },
            );
        } else if GET_ACTIVE_STATE.accept(envelope).is_some() {
            self.answer_active_state(state);
        } else {
            tracing::debug!(
                envelope_id = %envelope.id,
                source = %envelope.source,
                action = envelope.action(),
                "Coordinator ignoring unexpected message"
            );
        }
    }

    fn relay_content(
        &self,
        id: String,
        snapshot: Vec<shared_types::Message>,
        hash: String,
        state: &CoordinatorState,
    ) {
        let title = match state.active.id.as_deref() {
            Some(active) if active == id => state.active.title.clone(),
            _ => None,
        };
        tracing::trace!(conversation_id = %id, content_hash = %hash, "Relaying content");
        CONVERSATION_CHANGED.dispatch(
            &state.bus,
            ConversationChanged {
                id,
                snapshot: Some(snapshot),
                hash: Some(hash),
                title,
            },
        );
    }

    fn answer_active_state(&self, state: &CoordinatorState) {
        let Some(id) = state.active.id.clone() else {
            tracing::debug!("Active state requested before any navigation; nothing to replay");
            return;
        };
        tracing::debug!(conversation_id = %id, "Replaying active state");
        CONVERSATION_CHANGED.dispatch(
            &state.bus,
            ConversationChanged {
                id: id.clone(),
                snapshot: None,
                hash: None,
                title: state.active.title.clone(),
            },
        );
        REQUEST_CONTENT_EXTRACTION.dispatch(&state.bus, RequestContentExtraction { id });
    }
}

pub async fn active_conversation(
    coordinator: &ActorRef<CoordinatorMsg>,
) -> Result<ActiveConversation, ractor::RactorErr<CoordinatorMsg>> {
    ractor::call!(coordinator, |reply| CoordinatorMsg::GetActive { reply })
}
