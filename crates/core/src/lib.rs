//! Core domain logic for the call-stream relay.
//!
//! Everything in this crate is transport-agnostic: it knows how to name a
//! conversation's downstream channel, what a relay event looks like on the
//! wire, how raw upstream frames are classified, and how finalized speech is
//! translated. Sockets, tasks and the registry live in the service crate.

pub mod conversation;
pub mod event;
pub mod normalizer;
pub mod translation;

pub use conversation::{ConversationId, InvalidConversationId};
pub use event::{RelayEvent, Speaker, StreamStatus};
