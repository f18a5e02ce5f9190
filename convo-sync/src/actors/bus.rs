//! MessageBusActor - addressed message passing between the three contexts
//!
//! Every message travels in an [`Envelope`] naming its source and target
//! [`Context`]. Actors register an inbox for the context they implement;
//! the bus forwards each envelope to the inboxes registered for its target.
//!
//! Delivery is fire-and-forget. Sending when nobody is listening is not an
//! error: the envelope is logged and dropped. An inbox whose actor has gone
//! away is removed on the first failed delivery.
//!
//! # Channels
//!
//! A [`Channel`] bundles an action type with the route it travels on, so the
//! sender and the receiving predicate are derived from one declaration:
//!
//! ```rust,ignore
//! CONTENT_CHANGED.dispatch(&bus, ContentChanged { id, snapshot, hash });
//!
//! // in the receiver
//! if let Some(changed) = CONTENT_CHANGED.accept(&envelope) { ... }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ractor::{Actor, ActorId, ActorProcessingErr, ActorRef, RpcReplyPort};
use serde::{Deserialize, Serialize};
use shared_types::Message;

// ============================================================================
// Contexts and Envelopes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Context {
    /// Reads the foreign document.
    Observer,
    /// Owns active-conversation state and relays between the others.
    Coordinator,
    /// Owns processing state and drives the remote service.
    Controller,
}

impl Context {
    pub const ALL: [Context; 3] = [Context::Observer, Context::Coordinator, Context::Controller];

    pub fn as_str(&self) -> &'static str {
        match self {
            Context::Observer => "observer",
            Context::Coordinator => "coordinator",
            Context::Controller => "controller",
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// ULID
    pub id: String,
    pub source: Context,
    pub target: Context,
    pub sent_at: DateTime<Utc>,
    pub message: BusMessage,
}

impl Envelope {
    pub fn new(source: Context, target: Context, message: impl Into<BusMessage>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            source,
            target,
            sent_at: Utc::now(),
            message: message.into(),
        }
    }

    pub fn action(&self) -> &'static str {
        self.message.action()
    }
}

// ============================================================================
// Actions
// ============================================================================

/// First non-empty snapshot of a newly observed conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialContent {
    pub id: String,
    pub snapshot: Vec<Message>,
    pub hash: String,
}

/// Snapshot that survived the stability window (or a forced extraction).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentChanged {
    pub id: String,
    pub snapshot: Vec<Message>,
    pub hash: String,
}

/// The document now shows a different conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Navigated {
    pub id: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleUpdated {
    pub id: String,
    pub title: String,
}

/// Coordinator → Controller. Content fields are absent for navigation and
/// title-only updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationChanged {
    pub id: String,
    pub snapshot: Option<Vec<Message>>,
    pub hash: Option<String>,
    pub title: Option<String>,
}

/// Controller asks the Coordinator to replay what it knows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetActiveState {}

/// Coordinator asks the Observer for an immediate, undebounced snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestContentExtraction {
    pub id: String,
}

/// Payload that can ride the bus.
pub trait BusAction:
    Into<BusMessage> + TryFrom<BusMessage, Error = BusMessage> + Send + 'static
{
    /// Wire name, also the `action` tag in serialized envelopes.
    const ACTION: &'static str;
}

macro_rules! bus_actions {
    ($($variant:ident => $action:literal),* $(,)?) => {
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(tag = "action", rename_all = "snake_case")]
        pub enum BusMessage {
            $($variant($variant),)*
        }

        impl BusMessage {
            pub fn action(&self) -> &'static str {
                match self {
                    $(BusMessage::$variant(_) => $action,)*
                }
            }
        }

        $(
            impl BusAction for $variant {
                const ACTION: &'static str = $action;
            }

            impl From<$variant> for BusMessage {
                fn from(value: $variant) -> Self {
                    BusMessage::$variant(value)
                }
            }

            impl TryFrom<BusMessage> for $variant {
                type Error = BusMessage;

                fn try_from(message: BusMessage) -> Result<Self, Self::Error> {
                    match message {
                        BusMessage::$variant(value) => Ok(value),
                        other => Err(other),
                    }
                }
            }
        )*
    };
}

bus_actions! {
    InitialContent => "initial_content",
    ContentChanged => "content_changed",
    Navigated => "navigated",
    TitleUpdated => "title_updated",
    ConversationChanged => "conversation_changed",
    GetActiveState => "get_active_state",
    RequestContentExtraction => "request_content_extraction",
}

// ============================================================================
// Channels
// ============================================================================

/// A typed route: one action travelling from one context to another.
pub struct Channel<A> {
    pub source: Context,
    pub target: Context,
    _action: PhantomData<fn() -> A>,
}

impl<A> Clone for Channel<A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A> Copy for Channel<A> {}

impl<A: BusAction> fmt::Debug for Channel<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Channel({} {} -> {})", A::ACTION, self.source, self.target)
    }
}

impl<A: BusAction> Channel<A> {
    pub const fn new(source: Context, target: Context) -> Self {
        Self {
            source,
            target,
            _action: PhantomData,
        }
    }

    pub fn action(&self) -> &'static str {
        A::ACTION
    }

    /// Fire-and-forget send along this route.
    pub fn dispatch(&self, bus: &ActorRef<MessageBusMsg>, payload: A) {
        send(bus, self.source, self.target, payload);
    }

    /// Returns the payload if `envelope` travelled this route with this action.
    pub fn accept(&self, envelope: &Envelope) -> Option<A> {
        if envelope.source != self.source || envelope.target != self.target {
            return None;
        }
        A::try_from(envelope.message.clone()).ok()
    }
}

pub const INITIAL_CONTENT: Channel<InitialContent> =
    Channel::new(Context::Observer, Context::Coordinator);
pub const CONTENT_CHANGED: Channel<ContentChanged> =
    Channel::new(Context::Observer, Context::Coordinator);
pub const NAVIGATED: Channel<Navigated> = Channel::new(Context::Observer, Context::Coordinator);
pub const TITLE_UPDATED: Channel<TitleUpdated> =
    Channel::new(Context::Observer, Context::Coordinator);
pub const CONVERSATION_CHANGED: Channel<ConversationChanged> =
    Channel::new(Context::Coordinator, Context::Controller);
pub const GET_ACTIVE_STATE: Channel<GetActiveState> =
    Channel::new(Context::Controller, Context::Coordinator);
pub const REQUEST_CONTENT_EXTRACTION: Channel<RequestContentExtraction> =
    Channel::new(Context::Coordinator, Context::Observer);

/// Send `message` from `source` to `target`. Never fails; a bus that is gone
/// is logged at warn.
pub fn send(
    bus: &ActorRef<MessageBusMsg>,
    source: Context,
    target: Context,
    message: impl Into<BusMessage>,
) {
    let envelope = Envelope::new(source, target, message);
    let action = envelope.action();
    if let Err(e) = bus.cast(MessageBusMsg::Send(envelope)) {
        tracing::warn!(
            %source,
            %target,
            action,
            error = %e,
            "Message bus unavailable; message dropped"
        );
    }
}

// ============================================================================
// Inboxes
// ============================================================================

/// Anything that can take delivery of an envelope.
pub trait BusInbox: Send + Sync + fmt::Debug + 'static {
    fn deliver(&self, envelope: Envelope) -> Result<(), String>;

    fn actor_id(&self) -> ActorId;
}

impl<M> BusInbox for ActorRef<M>
where
    M: ractor::Message + From<Envelope>,
{
    fn deliver(&self, envelope: Envelope) -> Result<(), String> {
        self.cast(M::from(envelope))
            .map_err(|_| format!("actor {} is not accepting messages", self.get_id()))
    }

    fn actor_id(&self) -> ActorId {
        self.get_id()
    }
}

// ============================================================================
// MessageBusActor
// ============================================================================

#[derive(Debug)]
pub enum MessageBusMsg {
    /// Route an envelope to its target context.
    Send(Envelope),
    /// Register an inbox for a context. Re-subscribing the same actor is a no-op.
    Subscribe {
        context: Context,
        inbox: Box<dyn BusInbox>,
    },
    Unsubscribe {
        context: Context,
        actor_id: ActorId,
    },
    GetSubscriberCount {
        context: Context,
        reply: RpcReplyPort<usize>,
    },
    GetStats {
        reply: RpcReplyPort<BusStats>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    pub delivered: u64,
    /// Envelopes sent to a context nobody had subscribed.
    pub unrouted: u64,
    /// Deliveries that failed because the inbox had gone away.
    pub failed: u64,
}

pub struct MessageBusState {
    subscribers: HashMap<Context, Vec<Box<dyn BusInbox>>>,
    stats: BusStats,
}

#[derive(Debug, Default)]
pub struct MessageBusActor;

#[async_trait]
impl Actor for MessageBusActor {
    type Msg = MessageBusMsg;
    type State = MessageBusState;
    type Arguments = ();

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        _args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            actor_id = %myself.get_id(),
            "MessageBusActor starting"
        );
        Ok(MessageBusState {
            subscribers: HashMap::new(),
            stats: BusStats::default(),
        })
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        _state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!(
            actor_id = %myself.get_id(),
            "MessageBusActor started successfully"
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
            MessageBusMsg::Send(envelope) => self.handle_send(envelope, state),
            MessageBusMsg::Subscribe { context, inbox } => {
                self.handle_subscribe(context, inbox, state)
            }
            MessageBusMsg::Unsubscribe { context, actor_id } => {
                if let Some(inboxes) = state.subscribers.get_mut(&context) {
                    inboxes.retain(|inbox| inbox.actor_id() != actor_id);
                }
                tracing::debug!(%context, %actor_id, "Inbox unsubscribed");
            }
            MessageBusMsg::GetSubscriberCount { context, reply } => {
                let count = state.subscribers.get(&context).map_or(0, Vec::len);
                let _ = reply.send(count);
            }
            MessageBusMsg::GetStats { reply } => {
                let _ = reply.send(state.stats);
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        myself: ActorRef<Self::Msg>,
        _state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!(
            actor_id = %myself.get_id(),
            "MessageBusActor stopped"
        );
        Ok(())
    }
}

impl MessageBusActor {
    fn handle_send(&self, envelope: Envelope, state: &mut MessageBusState) {
        let inboxes = match state.subscribers.get_mut(&envelope.target) {
            Some(inboxes) if !inboxes.is_empty() => inboxes,
            _ => {
                state.stats.unrouted += 1;
                tracing::debug!(
                    envelope_id = %envelope.id,
                    source = %envelope.source,
                    target = %envelope.target,
                    action = envelope.action(),
                    "No subscriber for target context; dropping message"
                );
                return;
            }
        };

        tracing::trace!(
            envelope_id = %envelope.id,
            source = %envelope.source,
            target = %envelope.target,
            action = envelope.action(),
            "Routing message"
        );

        let stats = &mut state.stats;
        inboxes.retain(|inbox| match inbox.deliver(envelope.clone()) {
            Ok(()) => {
                stats.delivered += 1;
                true
            }
            Err(e) => {
                stats.failed += 1;
                tracing::warn!(
                    envelope_id = %envelope.id,
                    target = %envelope.target,
                    error = %e,
                    "Delivery failed; removing inbox"
                );
                false
            }
        });
    }

    fn handle_subscribe(
        &self,
        context: Context,
        inbox: Box<dyn BusInbox>,
        state: &mut MessageBusState,
    ) {
        let actor_id = inbox.actor_id();
        let inboxes = state.subscribers.entry(context).or_default();
        if inboxes.iter().any(|existing| existing.actor_id() == actor_id) {
            tracing::debug!(%context, %actor_id, "Inbox already subscribed");
            return;
        }
        tracing::debug!(%context, %actor_id, "Inbox subscribed");
        inboxes.push(inbox);
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Register `actor` as an inbox for `context`.
pub fn subscribe<M>(
    bus: &ActorRef<MessageBusMsg>,
    context: Context,
    actor: ActorRef<M>,
) -> Result<(), ractor::MessagingErr<MessageBusMsg>>
where
    M: ractor::Message + From<Envelope>,
{
    bus.cast(MessageBusMsg::Subscribe {
        context,
        inbox: Box::new(actor),
    })
}

pub fn unsubscribe(
    bus: &ActorRef<MessageBusMsg>,
    context: Context,
    actor_id: ActorId,
) -> Result<(), ractor::MessagingErr<MessageBusMsg>> {
    bus.cast(MessageBusMsg::Unsubscribe { context, actor_id })
}

pub async fn subscriber_count(
    bus: &ActorRef<MessageBusMsg>,
    context: Context,
) -> Result<usize, ractor::RactorErr<MessageBusMsg>> {
    ractor::call!(bus, |reply| MessageBusMsg::GetSubscriberCount {
        context,
        reply
    })
}

pub async fn bus_stats(
    bus: &ActorRef<MessageBusMsg>,
) -> Result<BusStats, ractor::RactorErr<MessageBusMsg>> {
    ractor::call!(bus, |reply| MessageBusMsg::GetStats { reply })
}

// ============================================================================
// Tests
// ============================================================================
