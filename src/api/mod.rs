pub mod bus;
pub mod events;

pub use bus::{DispatchResult, EventBus, EventContext, EventPriority, Listener, ListenerId};
pub use events::{EventKind, RemovalReason, VoiceEvent};
