//! ControllerActor implementation

use std::sync::Arc;

use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use shared_types::{ConversationView, ProcessingRecord, SimilarUserMatch};

use super::protocol::{ControllerMsg, ControllerSettings, ProcessOutcome, SkipReason};
use super::state::{apply_record, check_ready, ControllerState, InFlightCall};
use crate::actors::bus::{
    self, Context, ConversationChanged, GetActiveState, MessageBusMsg, CONVERSATION_CHANGED,
    GET_ACTIVE_STATE,
};
use crate::actors::record_store::{
    ensure_record, get_record, mark_completed, mark_failed, mark_processing, RecordStoreMsg,
};
use crate::fingerprint::fingerprint;
use crate::similarity::{serialize_snapshot, SimilarityService};

#[derive(Debug, Default)]
pub struct ControllerActor;

#[derive(Clone)]
pub struct ControllerArguments {
    pub bus: ActorRef<MessageBusMsg>,
    pub store: ActorRef<RecordStoreMsg>,
    pub service: Arc<dyn SimilarityService>,
    pub settings: ControllerSettings,
}

#[async_trait]
impl Actor for ControllerActor {
    type Msg = ControllerMsg;
    type State = ControllerState;
    type Arguments = ControllerArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            actor_id = %myself.get_id(),
            remote_timeout_ms = args.settings.remote_timeout.as_millis() as u64,
            auto_process = args.settings.auto_process,
            "ControllerActor starting"
        );
        bus::subscribe(&args.bus, Context::Controller, myself.clone())
            .map_err(|e| ActorProcessingErr::from(format!("Failed to subscribe to bus: {e}")))?;

        Ok(ControllerState::new(
            args.bus,
            args.store,
            args.service,
            args.settings,
        ))
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        // Cold start: the Observer may have emitted before we subscribed.
        GET_ACTIVE_STATE.dispatch(&state.bus, GetActiveState {});
        tracing::info!(
            actor_id = %myself.get_id(),
            "ControllerActor started successfully"
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
            ControllerMsg::Bus(envelope) => {
                if let Some(change) = CONVERSATION_CHANGED.accept(&envelope) {
                    self.handle_conversation_changed(&myself, change, state)
                        .await;
                } else {
                    tracing::debug!(
                        envelope_id = %envelope.id,
                        action = envelope.action(),
                        "Controller ignoring unexpected message"
                    );
                }
            }
            ControllerMsg::ProcessConversation {
                force_refresh,
                reply,
            } => {
                self.handle_process(&myself, force_refresh, reply, state)
                    .await;
            }
            ControllerMsg::RemoteCallFinished {
                conversation_id,
                content_hash,
                result,
            } => {
                self.handle_remote_call_finished(
                    &myself,
                    conversation_id,
                    content_hash,
                    result,
                    state,
                )
                .await;
            }
            ControllerMsg::GetView { reply } => {
                let _ = reply.send(state.view.clone());
            }
            ControllerMsg::Subscribe { reply } => {
                let _ = reply.send(state.subscribe());
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Err(e) = bus::unsubscribe(&state.bus, Context::Controller, myself.get_id()) {
            tracing::debug!(error = %e, "Bus already gone at shutdown");
        }
        if let Some(call) = state.in_flight.take() {
            call.task.abort();
            tracing::warn!(
                conversation_id = %call.conversation_id,
                content_hash = %call.content_hash,
                "Controller stopped with a remote call in flight"
            );
        }
        tracing::info!(
            actor_id = %myself.get_id(),
            "ControllerActor stopped"
        );
        Ok(())
    }
}

fn respond(reply: Option<RpcReplyPort<ProcessOutcome>>, outcome: ProcessOutcome) {
    if let Some(reply) = reply {
        let _ = reply.send(outcome);
    }
}

impl ControllerActor {
    // ========================================================================
    // Bus events
    // ========================================================================

    async fn handle_conversation_changed(
        &self,
        myself: &ActorRef<ControllerMsg>,
        change: ConversationChanged,
        state: &mut ControllerState,
    ) {
        let ConversationChanged {
            id,
            snapshot,
            hash,
            title,
        } = change;

        if !state.is_active(&id) {
            if state.view.conversation_id.is_some() && snapshot.is_some() {
                // Late content for a conversation that is no longer shown.
                tracing::debug!(
                    conversation_id = %id,
                    content_hash = ?hash,
                    "Content for inactive conversation; view left untouched"
                );
                if let Err(e) = ensure_record(&state.store, id.clone()).await {
                    tracing::warn!(conversation_id = %id, error = %e, "Failed to create record");
                }
                return;
            }
            self.switch_to(&id, title.clone(), state).await;
        }

        let mut title_changed = false;
        if let Some(title) = title {
            if state.view.title.as_deref() != Some(title.as_str()) {
                state.view.title = Some(title);
                title_changed = true;
            }
        }

        let mut content_changed = false;
        if let (Some(snapshot), Some(hash)) = (snapshot, hash) {
            if state.view.content_hash.as_deref() != Some(hash.as_str()) {
                tracing::debug!(
                    conversation_id = %id,
                    content_hash = %hash,
                    messages = snapshot.len(),
                    "Active conversation content updated"
                );
                state.view.messages = snapshot;
                state.view.content_hash = Some(hash);
                content_changed = true;
                if let Err(e) = ensure_record(&state.store, id.clone()).await {
                    tracing::warn!(conversation_id = %id, error = %e, "Failed to create record");
                }
            }
        }

        state.publish();

        if title_changed || content_changed {
            self.request_auto_process(myself, state);
        }
    }

    /// Make `id` the active conversation and show its durable record.
    async fn switch_to(&self, id: &str, title: Option<String>, state: &mut ControllerState) {
        tracing::info!(conversation_id = %id, "Switching active conversation");
        state.view = ConversationView {
            conversation_id: Some(id.to_string()),
            title,
            is_loading: state.in_flight_for(id),
            ..Default::default()
        };
        match get_record(&state.store, id).await {
            Ok(Some(record)) => apply_record(&mut state.view, &record),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(conversation_id = %id, error = %e, "Failed to load record")
            }
        }
    }

    fn request_auto_process(&self, myself: &ActorRef<ControllerMsg>, state: &mut ControllerState) {
        if !state.settings.auto_process {
            return;
        }
        if state.in_flight.is_some() {
            state.auto_pending = true;
            return;
        }
        let msg = ControllerMsg::ProcessConversation {
            force_refresh: false,
            reply: None,
        };
        if let Err(e) = myself.cast(msg) {
            tracing::warn!(error = %e, "Failed to schedule automatic processing");
        }
    }

    // ========================================================================
    // Processing
    // ========================================================================

    async fn handle_process(
        &self,
        myself: &ActorRef<ControllerMsg>,
        force_refresh: bool,
        reply: Option<RpcReplyPort<ProcessOutcome>>,
        state: &mut ControllerState,
    ) {
        if let Some(call) = &state.in_flight {
            tracing::debug!(
                conversation_id = %call.conversation_id,
                "Remote call in flight; processing request skipped"
            );
            if reply.is_none() {
                state.auto_pending = true;
            }
            respond(reply, ProcessOutcome::skipped(SkipReason::InFlight));
            return;
        }

        let ready = match check_ready(&state.view, state.settings.min_assistant_chars) {
            Ok(ready) => ready,
            Err(reason) => {
                tracing::debug!(
                    conversation_id = ?state.view.conversation_id,
                    reason = %reason,
                    "Conversation not ready for processing"
                );
                respond(reply, ProcessOutcome::skipped(SkipReason::NotReady(reason)));
                return;
            }
        };
        let hash = fingerprint(&ready.messages);

        let record = match get_record(&state.store, ready.id.clone()).await {
            Ok(Some(record)) => record,
            Ok(None) => ProcessingRecord::idle(ready.id.clone()),
            Err(e) => {
                self.fail_attempt(&ready.id, format!("record store: {e}"), reply, state);
                return;
            }
        };

        if !force_refresh && record.is_settled_for(&hash) {
            tracing::debug!(
                conversation_id = %ready.id,
                content_hash = %hash,
                status = %record.status,
                "Record already settled for this content; skipping"
            );
            respond(reply, ProcessOutcome::skipped(SkipReason::UpToDate));
            return;
        }

        let content = match serialize_snapshot(&ready.messages) {
            Ok(content) => content,
            Err(e) => {
                self.fail_attempt(&ready.id, e.to_string(), reply, state);
                return;
            }
        };

        let attempt = match mark_processing(&state.store, ready.id.clone(), hash.clone()).await {
            Ok(attempt) => attempt,
            Err(e) => {
                self.fail_attempt(&ready.id, format!("record store: {e}"), reply, state);
                return;
            }
        };

        tracing::info!(
            conversation_id = %ready.id,
            content_hash = %hash,
            force_refresh,
            messages = ready.messages.len(),
            "Processing conversation"
        );

        if state.is_active(&ready.id) {
            state.view.is_loading = true;
            state.view.processing_error = None;
            state.view.processing_metadata = Some(attempt.metadata());
            state.publish();
        }

        let service = Arc::clone(&state.service);
        let timeout = state.settings.remote_timeout;
        let finished_ref = myself.clone();
        let (id, title, call_hash) = (ready.id.clone(), ready.title, hash.clone());
        let task = tokio::spawn(async move {
            let result =
                match tokio::time::timeout(timeout, service.upsert_conversation(&id, &title, &content))
                    .await
                {
                    Ok(Ok(matches)) => Ok(matches),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(format!("timeout after {}ms", timeout.as_millis())),
                };
            let _ = finished_ref.cast(ControllerMsg::RemoteCallFinished {
                conversation_id: id,
                content_hash: call_hash,
                result,
            });
        });

        state.in_flight = Some(InFlightCall {
            conversation_id: ready.id,
            content_hash: hash,
            reply,
            task,
        });
    }

    async fn handle_remote_call_finished(
        &self,
        myself: &ActorRef<ControllerMsg>,
        conversation_id: String,
        content_hash: String,
        result: Result<Vec<SimilarUserMatch>, String>,
        state: &mut ControllerState,
    ) {
        let call = match state.in_flight.take() {
            Some(call)
                if call.conversation_id == conversation_id
                    && call.content_hash == content_hash =>
            {
                call
            }
            other => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    content_hash = %content_hash,
                    "Remote call result does not match the call in flight; ignoring"
                );
                state.in_flight = other;
                return;
            }
        };

        let (written, outcome) = match result {
            Ok(matches) => {
                tracing::info!(
                    conversation_id = %conversation_id,
                    content_hash = %content_hash,
                    matches = matches.len(),
                    "Processing completed"
                );
                (
                    mark_completed(&state.store, &conversation_id, &content_hash, matches.clone())
                        .await,
                    ProcessOutcome::Completed { matches },
                )
            }
            Err(error) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    content_hash = %content_hash,
                    error = %error,
                    "Processing failed"
                );
                (
                    mark_failed(&state.store, &conversation_id, &content_hash, error.clone())
                        .await,
                    ProcessOutcome::Failed { error },
                )
            }
        };

        let outcome = match written {
            Ok(terminal) => {
                if state.is_active(&conversation_id) {
                    state.view.is_loading = false;
                    apply_record(&mut state.view, &terminal);
                    state.publish();
                }
                outcome
            }
            Err(e) => {
                let error = format!("record store: {e}");
                tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %error,
                    "Failed to store processing result"
                );
                if state.is_active(&conversation_id) {
                    state.view.is_loading = false;
                    state.view.processing_error = Some(error.clone());
                    state.publish();
                }
                ProcessOutcome::Failed { error }
            }
        };

        respond(call.reply, outcome);

        if std::mem::take(&mut state.auto_pending) {
            self.request_auto_process(myself, state);
        }
    }

    /// An attempt that failed before any remote call was issued.
    fn fail_attempt(
        &self,
        conversation_id: &str,
        error: String,
        reply: Option<RpcReplyPort<ProcessOutcome>>,
        state: &mut ControllerState,
    ) {
        tracing::warn!(
            conversation_id = %conversation_id,
            error = %error,
            "Processing attempt failed"
        );
        if state.is_active(conversation_id) {
            state.view.is_loading = false;
            state.view.processing_error = Some(error.clone());
            state.publish();
        }
        respond(reply, ProcessOutcome::Failed { error });
    }
}
