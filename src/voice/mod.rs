pub mod receive;
pub mod registry;
pub mod send;
pub mod session;
pub mod source;
pub mod transport;

pub use receive::{
    AudioCallback, AudioReceiveHandler, BasicReceiveHandler, ReceiveDispatcher, ReceiveHandler,
};
pub use registry::AudioSessionRegistry;
pub use send::{AudioSendHandler, BasicSendHandler, MixingSendHandler, SendHandler};
pub use session::{AudioSession, ConnectionState, ReceiveRegistration, SendRegistration};
pub use source::{AudioSource, SourceProfile};
pub use transport::{LoopbackTransport, TickDriver, TickStats, VoiceTransport};
