//! Durable queue of outbound messages
//!
//! Messages are written once by enqueuing collaborators and afterwards only
//! changed through the store's conditional transitions.

mod message;
pub mod store;

pub use message::{
    MessageStatus, MessageType, NewMessage, QueueId, QueuedMessage, UnknownValue,
    DEFAULT_MAX_ATTEMPTS,
};
pub use store::{QueueStats, QueueStore, SharedStore, BUSY_TIMEOUT, INTERRUPTED_ATTEMPT_ERROR};
