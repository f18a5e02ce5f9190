//! Wiring for a complete sync pipeline
//!
//! Spawn order matters: the Coordinator and Controller subscribe to the bus
//! before the Observer emits its first events. A Controller started later
//! still catches up through `GetActiveState`.

use std::sync::Arc;
use std::time::Duration;

use ractor::{Actor, ActorRef};
use tokio::task::JoinHandle;

use crate::actors::controller::{ControllerActor, ControllerArguments, ControllerMsg, ControllerSettings};
use crate::actors::coordinator::{CoordinatorActor, CoordinatorArguments, CoordinatorMsg};
use crate::actors::observer::{ObserverActor, ObserverArguments, ObserverMsg};
use crate::actors::record_store::{RecordStoreActor, RecordStoreArguments, RecordStoreMsg};
use crate::actors::{MessageBusActor, MessageBusMsg};
use crate::config::Config;
use crate::document::DocumentSource;
use crate::similarity::SimilarityService;

pub struct RuntimeOptions {
    pub store: RecordStoreArguments,
    pub source: Arc<dyn DocumentSource>,
    pub service: Arc<dyn SimilarityService>,
    pub debounce: Duration,
    pub controller: ControllerSettings,
}

impl RuntimeOptions {
    pub fn from_config(
        config: &Config,
        source: Arc<dyn DocumentSource>,
        service: Arc<dyn SimilarityService>,
    ) -> Self {
        Self {
            store: RecordStoreArguments::File(config.database_url.clone()),
            source,
            service,
            debounce: config.debounce,
            controller: ControllerSettings::from(config),
        }
    }
}

/// Handles to every actor of a running pipeline.
pub struct SyncRuntime {
    pub store: ActorRef<RecordStoreMsg>,
    pub bus: ActorRef<MessageBusMsg>,
    pub coordinator: ActorRef<CoordinatorMsg>,
    pub controller: ActorRef<ControllerMsg>,
    pub observer: ActorRef<ObserverMsg>,
    handles: Vec<JoinHandle<()>>,
}

impl SyncRuntime {
    pub async fn start(options: RuntimeOptions) -> anyhow::Result<Self> {
        let (store, store_handle) = Actor::spawn(None, RecordStoreActor, options.store)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to spawn RecordStoreActor: {e}"))?;

        let (bus, bus_handle) = Actor::spawn(None, MessageBusActor, ())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to spawn MessageBusActor: {e}"))?;

        let (coordinator, coordinator_handle) = Actor::spawn(
            None,
            CoordinatorActor,
            CoordinatorArguments { bus: bus.clone() },
        )
        .await
        .map_err(|e| anyhow::anyhow!("Failed to spawn CoordinatorActor: {e}"))?;

        let (controller, controller_handle) = Actor::spawn(
            None,
            ControllerActor,
            ControllerArguments {
                bus: bus.clone(),
                store: store.clone(),
                service: options.service,
                settings: options.controller,
            },
        )
        .await
        .map_err(|e| anyhow::anyhow!("Failed to spawn ControllerActor: {e}"))?;

        let (observer, observer_handle) = Actor::spawn(
            None,
            ObserverActor,
            ObserverArguments {
                source: options.source,
                bus: bus.clone(),
                debounce: options.debounce,
            },
        )
        .await
        .map_err(|e| anyhow::anyhow!("Failed to spawn ObserverActor: {e}"))?;

        tracing::info!("Sync runtime started");

        Ok(Self {
            store,
            bus,
            coordinator,
            controller,
            observer,
            handles: vec![
                observer_handle,
                controller_handle,
                coordinator_handle,
                bus_handle,
                store_handle,
            ],
        })
    }

    /// Stop every actor, producers first, and wait for them to exit.
    pub async fn shutdown(self) {
        self.observer.stop(None);
        self.controller.stop(None);
        self.coordinator.stop(None);
        self.bus.stop(None);
        self.store.stop(None);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Actor task ended abnormally");
            }
        }
        tracing::info!("Sync runtime stopped");
    }
}
