//! Core data types shared across the engine.

mod capability;
mod flags;
mod identifiers;

pub use capability::Capabilities;
pub use flags::MessageFlags;
pub use identifiers::{MessageId, SeqNum, Tag};
