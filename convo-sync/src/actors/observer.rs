//! ObserverActor - reads the foreign document and turns its churn into events
//!
//! Two change streams come out of one [`DocumentSource`] subscription each:
//!
//! - the location watcher notices which conversation the document shows and
//!   emits `Navigated` / `TitleUpdated`;
//! - the observation of the current conversation re-extracts the snapshot on
//!   every mutation and feeds its fingerprint through a [`Debouncer`]. Only a
//!   fingerprint that survives the stability window becomes `ContentChanged`.
//!
//! A new observation emits `InitialContent` straight away when the document
//! already has messages. `RequestContentExtraction` from the Coordinator
//! bypasses the window and emits `ContentChanged` immediately.
//!
//! Empty snapshots are never emitted. Snapshots ending in a user message are
//! emitted like any other; deciding whether a turn is complete is the
//! Controller's job.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use shared_types::Message;
use tokio::task::{AbortHandle, JoinHandle};

use crate::actors::bus::{
    self, ContentChanged, Context, Envelope, InitialContent, MessageBusMsg, Navigated,
    TitleUpdated, CONTENT_CHANGED, INITIAL_CONTENT, NAVIGATED, REQUEST_CONTENT_EXTRACTION,
    TITLE_UPDATED,
};
use crate::debounce::{DebounceDecision, Debouncer};
use crate::document::{DocumentSource, Location};
use crate::fingerprint::fingerprint;

#[derive(Debug, Default)]
pub struct ObserverActor;

#[derive(Clone)]
pub struct ObserverArguments {
    pub source: Arc<dyn DocumentSource>,
    pub bus: ActorRef<MessageBusMsg>,
    /// Stability window for content changes
    pub debounce: Duration,
}

pub struct ObserverState {
    source: Arc<dyn DocumentSource>,
    bus: ActorRef<MessageBusMsg>,
    /// Conversation currently observed, with the title last reported for it
    observed: Option<Location>,
    observation: Option<ObservationHandle>,
    debouncer: Debouncer<Vec<Message>>,
    location_watcher: Option<JoinHandle<()>>,
}

#[derive(Debug)]
pub enum ObserverMsg {
    Bus(Envelope),
    /// The document changed; re-check which conversation it shows.
    CheckLocation,
    /// The observed conversation's content may have changed.
    ContentMutated { conversation_id: String },
    DebounceElapsed {
        conversation_id: String,
        generation: u64,
    },
    /// Extract and emit now, bypassing the stability window.
    ForceExtraction { conversation_id: String },
    GetStatus { reply: RpcReplyPort<ObserverStatus> },
}

impl From<Envelope> for ObserverMsg {
    fn from(envelope: Envelope) -> Self {
        ObserverMsg::Bus(envelope)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserverStatus {
    pub conversation_id: Option<String>,
    pub title: Option<String>,
    /// Fingerprint of the last snapshot emitted for the observed conversation
    pub last_emitted_hash: Option<String>,
    pub pending: bool,
    pub debounce_ms: u64,
}

// ============================================================================
// Observation Handle
// ============================================================================

/// Disposer for one conversation's observation. Disposing stops the change
/// subscription and any pending stability timer; doing it twice is harmless.
/// Dropping the handle disposes it.
#[derive(Debug)]
pub struct ObservationHandle {
    conversation_id: String,
    disposed: Arc<AtomicBool>,
    subscription: AbortHandle,
    timer: Mutex<Option<AbortHandle>>,
}

impl ObservationHandle {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.subscription.abort();
        self.cancel_timer();
        tracing::debug!(conversation_id = %self.conversation_id, "Observation disposed");
    }

    fn replace_timer(&self, timer: AbortHandle) {
        let previous = match self.timer.lock() {
            Ok(mut slot) => slot.replace(timer),
            Err(poisoned) => poisoned.into_inner().replace(timer),
        };
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn cancel_timer(&self) {
        let previous = match self.timer.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

impl Drop for ObservationHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ============================================================================
// Actor
// ============================================================================

#[async_trait]
impl Actor for ObserverActor {
    type Msg = ObserverMsg;
    type State = ObserverState;
    type Arguments = ObserverArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            actor_id = %myself.get_id(),
            debounce_ms = args.debounce.as_millis() as u64,
            "ObserverActor starting"
        );

        bus::subscribe(&args.bus, Context::Observer, myself.clone())
            .map_err(|e| ActorProcessingErr::from(format!("Failed to subscribe to bus: {e}")))?;

        Ok(ObserverState {
            source: args.source,
            bus: args.bus,
            observed: None,
            observation: None,
            debouncer: Debouncer::new(args.debounce),
            location_watcher: None,
        })
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let mut changes = state.source.subscribe();
        let watcher_ref = myself.clone();
        state.location_watcher = Some(tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                if watcher_ref.cast(ObserverMsg::CheckLocation).is_err() {
                    break;
                }
            }
        }));

        // The document may already show a conversation.
        myself
            .cast(ObserverMsg::CheckLocation)
            .map_err(|e| ActorProcessingErr::from(format!("Failed to schedule location check: {e}")))?;

        tracing::info!(
            actor_id = %myself.get_id(),
            "ObserverActor started successfully"
        );
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ObserverMsg::Bus(envelope) => {
                if let Some(request) = REQUEST_CONTENT_EXTRACTION.accept(&envelope) {
                    self.force_extraction(&request.id, state);
                } else {
                    tracing::debug!(
                        envelope_id = %envelope.id,
                        action = envelope.action(),
                        "Observer ignoring unexpected message"
                    );
                }
            }
            ObserverMsg::CheckLocation => self.check_location(&myself, state),
            ObserverMsg::ContentMutated { conversation_id } => {
                self.track_conversation(&conversation_id, &myself, state)
            }
            ObserverMsg::DebounceElapsed {
                conversation_id,
                generation,
            } => self.handle_debounce_elapsed(&conversation_id, generation, state),
            ObserverMsg::ForceExtraction { conversation_id } => {
                self.force_extraction(&conversation_id, state)
            }
            ObserverMsg::GetStatus { reply } => {
                let _ = reply.send(ObserverStatus {
                    conversation_id: state.observed.as_ref().map(|l| l.conversation_id.clone()),
                    title: state.observed.as_ref().and_then(|l| l.title.clone()),
                    last_emitted_hash: state.debouncer.last_fired().map(str::to_string),
                    pending: state.debouncer.is_pending(),
                    debounce_ms: state.debouncer.window().as_millis() as u64,
                });
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Err(e) = bus::unsubscribe(&state.bus, Context::Observer, myself.get_id()) {
            tracing::debug!(error = %e, "Bus already gone at shutdown");
        }
        if let Some(watcher) = state.location_watcher.take() {
            watcher.abort();
        }
        if state.debouncer.cancel() {
            tracing::debug!("Observer stopped with a content change still pending");
        }
        if let Some(observation) = state.observation.take() {
            observation.dispose();
        }
        tracing::info!(
            actor_id = %myself.get_id(),
            "ObserverActor stopped"
        );
        Ok(())
    }
}

impl ObserverActor {
    fn check_location(&self, myself: &ActorRef<ObserverMsg>, state: &mut ObserverState) {
        let Some(location) = state.source.location() else {
            tracing::trace!("Document shows no conversation");
            return;
        };

        let same_conversation = state
            .observed
            .as_ref()
            .is_some_and(|observed| observed.conversation_id == location.conversation_id);

        if !same_conversation {
            tracing::info!(
                conversation_id = %location.conversation_id,
                title = ?location.title,
                "Navigated to conversation"
            );
            NAVIGATED.dispatch(
                &state.bus,
                Navigated {
                    id: location.conversation_id.clone(),
                    title: location.title.clone(),
                },
            );
            let handle = self.observe_conversation(&location.conversation_id, myself, state);
            state.observed = Some(location);
            state.observation = Some(handle);
            return;
        }

        let previous_title = state.observed.as_ref().and_then(|o| o.title.clone());
        if let Some(title) = location
            .title
            .clone()
            .filter(|title| previous_title.as_ref() != Some(title))
        {
            tracing::debug!(
                conversation_id = %location.conversation_id,
                title = %title,
                "Conversation title updated"
            );
            TITLE_UPDATED.dispatch(
                &state.bus,
                TitleUpdated {
                    id: location.conversation_id.clone(),
                    title,
                },
            );
            state.observed = Some(location);
        }
    }

    /// Start observing `conversation_id`, replacing any earlier observation.
    fn observe_conversation(
        &self,
        conversation_id: &str,
        myself: &ActorRef<ObserverMsg>,
        state: &mut ObserverState,
    ) -> ObservationHandle {
        if let Some(previous) = state.observation.take() {
            previous.dispose();
        }
        state.debouncer.reset();

        let snapshot = state.source.extract();
        if !snapshot.is_empty() {
            let hash = fingerprint(&snapshot);
            tracing::debug!(
                conversation_id = %conversation_id,
                content_hash = %hash,
                messages = snapshot.len(),
                "Emitting initial content"
            );
            state.debouncer.mark_fired(hash.clone());
            INITIAL_CONTENT.dispatch(
                &state.bus,
                InitialContent {
                    id: conversation_id.to_string(),
                    snapshot,
                    hash,
                },
            );
        }

        let mut changes = state.source.subscribe();
        let forward_ref = myself.clone();
        let id = conversation_id.to_string();
        let subscription = tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let msg = ObserverMsg::ContentMutated {
                    conversation_id: id.clone(),
                };
                if forward_ref.cast(msg).is_err() {
                    break;
                }
            }
        });

        ObservationHandle {
            conversation_id: conversation_id.to_string(),
            disposed: Arc::new(AtomicBool::new(false)),
            subscription: subscription.abort_handle(),
            timer: Mutex::new(None),
        }
    }

    fn active_observation<'a>(
        &self,
        conversation_id: &str,
        state: &'a ObserverState,
    ) -> Option<&'a ObservationHandle> {
        let observation = state.observation.as_ref()?;
        if observation.is_disposed() || observation.conversation_id() != conversation_id {
            return None;
        }
        // A navigation may be queued behind this message; the document
        // would then hold the next conversation's content.
        let showing = state.source.location()?;
        (showing.conversation_id == conversation_id).then_some(observation)
    }

    fn track_conversation(
        &self,
        conversation_id: &str,
        myself: &ActorRef<ObserverMsg>,
        state: &mut ObserverState,
    ) {
        let Some(observation) = self.active_observation(conversation_id, state) else {
            tracing::trace!(conversation_id = %conversation_id, "Stale mutation ignored");
            return;
        };
        let disposed = Arc::clone(&observation.disposed);

        let snapshot = state.source.extract();
        if snapshot.is_empty() {
            tracing::trace!(conversation_id = %conversation_id, "Empty snapshot not tracked");
            return;
        }
        let hash = fingerprint(&snapshot);

        match state
            .debouncer
            .observe(hash.clone(), snapshot, Instant::now())
        {
            DebounceDecision::Schedule {
                generation,
                deadline,
            } => {
                tracing::trace!(
                    conversation_id = %conversation_id,
                    content_hash = %hash,
                    generation,
                    "Content changed; stability window started"
                );
                let timer_ref = myself.clone();
                let id = conversation_id.to_string();
                let timer = tokio::spawn(async move {
                    tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
                    if disposed.load(Ordering::SeqCst) {
                        return;
                    }
                    let _ = timer_ref.cast(ObserverMsg::DebounceElapsed {
                        conversation_id: id,
                        generation,
                    });
                });
                if let Some(observation) = state.observation.as_ref() {
                    observation.replace_timer(timer.abort_handle());
                }
            }
            DebounceDecision::Reverted => {
                if let Some(observation) = state.observation.as_ref() {
                    observation.cancel_timer();
                }
            }
            DebounceDecision::AlreadyPending | DebounceDecision::Unchanged => {}
        }
    }

    fn handle_debounce_elapsed(
        &self,
        conversation_id: &str,
        generation: u64,
        state: &mut ObserverState,
    ) {
        if self.active_observation(conversation_id, state).is_none() {
            return;
        }
        let Some((hash, snapshot)) = state.debouncer.elapse(generation) else {
            tracing::trace!(generation, "Stale stability timer ignored");
            return;
        };

        tracing::debug!(
            conversation_id = %conversation_id,
            content_hash = %hash,
            messages = snapshot.len(),
            "Content stable; emitting change"
        );
        CONTENT_CHANGED.dispatch(
            &state.bus,
            ContentChanged {
                id: conversation_id.to_string(),
                snapshot,
                hash,
            },
        );
    }

    fn force_extraction(&self, conversation_id: &str, state: &mut ObserverState) {
        let Some(observation) = self.active_observation(conversation_id, state) else {
            tracing::debug!(
                conversation_id = %conversation_id,
                "Extraction requested for a conversation not being observed"
            );
            return;
        };
        observation.cancel_timer();

        let snapshot = state.source.extract();
        if snapshot.is_empty() {
            tracing::debug!(conversation_id = %conversation_id, "Forced extraction found no content");
            return;
        }
        let hash = fingerprint(&snapshot);
        state.debouncer.mark_fired(hash.clone());

        tracing::debug!(
            conversation_id = %conversation_id,
            content_hash = %hash,
            "Forced extraction; emitting content"
        );
        CONTENT_CHANGED.dispatch(
            &state.bus,
            ContentChanged {
                id: conversation_id.to_string(),
                snapshot,
                hash,
            },
        );
    }
}

pub async fn observer_status(
    observer: &ActorRef<ObserverMsg>,
) -> Result<ObserverStatus, ractor::RactorErr<ObserverMsg>> {
    ractor::call!(observer, |reply| ObserverMsg::GetStatus { reply })
}

// ============================================================================
// Tests
// ============================================================================
