pub mod bus;
pub mod controller;
pub mod coordinator;
pub mod observer;
pub mod record_store;

#[cfg(test)]
pub(crate) mod test_support;

pub use bus::{Context, Envelope, MessageBusActor, MessageBusMsg};
pub use controller::{ControllerActor, ControllerArguments, ControllerMsg};
pub use coordinator::{CoordinatorActor, CoordinatorArguments, CoordinatorMsg};
pub use observer::{ObserverActor, ObserverArguments, ObserverMsg};
pub use record_store::{RecordStoreActor, RecordStoreArguments, RecordStoreMsg};
