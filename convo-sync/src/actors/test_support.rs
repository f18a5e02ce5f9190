//! Helpers shared by actor unit tests.

use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::mpsc;

use crate::actors::bus::Envelope;

/// Bus inbox that forwards every envelope into a channel.
pub struct ProbeActor;

#[async_trait]
impl Actor for ProbeActor {
    type Msg = Envelope;
    type State = mpsc::UnboundedSender<Envelope>;
    type Arguments = mpsc::UnboundedSender<Envelope>;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        Ok(args)
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let _ = state.send(message);
        Ok(())
    }
}

pub async fn spawn_probe() -> (ActorRef<Envelope>, mpsc::UnboundedReceiver<Envelope>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (probe, _handle) = Actor::spawn(None, ProbeActor, tx).await.unwrap();
    (probe, rx)
}
