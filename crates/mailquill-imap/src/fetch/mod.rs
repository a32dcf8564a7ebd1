//! Message data retrieval.
//!
//! Two fetchers with different shapes: [`headers`] pulls summary rows
//! for a whole range into one staging buffer, [`message`] materializes
//! single full messages into a small rotating file cache.

pub mod headers;
pub mod message;

pub use headers::{HeaderBatch, HeaderRecord, fetch_headers};
pub use message::{CachedMessage, MessageCache, MessageHeaders};
