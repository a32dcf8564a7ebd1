//! Response payload parsing.

mod fetch;

pub use fetch::{FetchFieldParser, FetchFields};
