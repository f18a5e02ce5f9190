//! ControllerActor - per-conversation processing state machine
//!
//! Owns the view the UI renders and decides when the remote similarity
//! service is called. Records are keyed by conversation id and guarded by
//! content fingerprint:
//!
//! ```text
//! Idle ──▶ Processing ──▶ Completed
//!              │
//!              └────────▶ Error
//!
//! Completed | Error ──(new fingerprint or force_refresh)──▶ Processing
//! ```
//!
//! `Processing` is written to the store before the call starts. The call runs
//! on a spawned task bounded by a timeout and reports back with
//! `RemoteCallFinished`; until then every further request is skipped.
//!
//! ```rust,ignore
//! let (controller, _) = Actor::spawn(None, ControllerActor, args).await?;
//! let outcome = process_conversation(&controller, false).await?;
//! ```

pub mod actor;
pub mod protocol;
pub mod state;

pub use actor::{ControllerActor, ControllerArguments};
pub use protocol::{ControllerMsg, ControllerSettings, ProcessOutcome, SkipReason};
pub use state::ControllerState;

use ractor::ActorRef;
use shared_types::ConversationView;
use tokio::sync::watch;

/// Run one processing attempt and wait for its outcome. `Err` only when the
/// controller cannot be reached; every attempt it runs ends in an outcome.
pub async fn process_conversation(
    controller: &ActorRef<ControllerMsg>,
    force_refresh: bool,
) -> Result<ProcessOutcome, ractor::RactorErr<ControllerMsg>> {
    ractor::call!(controller, |reply| ControllerMsg::ProcessConversation {
        force_refresh,
        reply: Some(reply),
    })
}

pub async fn get_view(
    controller: &ActorRef<ControllerMsg>,
) -> Result<ConversationView, ractor::RactorErr<ControllerMsg>> {
    ractor::call!(controller, |reply| ControllerMsg::GetView { reply })
}

pub async fn subscribe_view(
    controller: &ActorRef<ControllerMsg>,
) -> Result<watch::Receiver<ConversationView>, ractor::RactorErr<ControllerMsg>> {
    ractor::call!(controller, |reply| ControllerMsg::Subscribe { reply })
}
