//! Parameter synchronization between an interactive UI and an asynchronous
//! control host.
//!
//! The host is reached through the [`Bridge`] trait. [`ParameterStore`] owns
//! the authoritative values and the one-way ready gate, [`GrabManager`]
//! serializes grabbed moves per handle, and [`GestureController`] turns a
//! drag into clamped moves routed through one grab.

pub mod bridge;
pub mod config;
pub mod gesture;
pub mod grab;
pub mod loopback;
pub mod registry;
pub mod store;

pub use bridge::{Bridge, InertBridge};
pub use config::{load_settings, load_settings_from, Settings};
pub use gesture::{
    GestureClient, GestureController, GestureError, GestureHook, GrabGestureHook, KnobConfig,
};
pub use grab::{Grab, GrabError, GrabManager, GrabPolicy, MoveAck};
pub use loopback::LoopbackHost;
pub use registry::{ParameterDescriptor, ParameterRegistry, RegistryError};
pub use store::{spawn_event_pump, ParameterStore, StoreEvent, Subscription};

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
