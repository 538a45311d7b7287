//! The relay engine: per-conversation sessions bridging an upstream voice
//! agent to a downstream broadcast channel.

pub mod control;
pub mod publisher;
pub mod registry;
pub mod session;
pub mod upstream;

pub use control::{ControlError, RelayControl, StartOutcome, StopOutcome};
pub use publisher::{BroadcastHub, EventPublisher, PublishError};
pub use registry::{RelayRegistry, RelaySnapshot, RelayState};
pub use upstream::{ElevenLabsConnector, UpstreamConnector, UpstreamLink, UpstreamMessage};
