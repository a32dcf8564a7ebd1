//! IMAP connection management.
//!
//! This module provides the transport layer for the engine, including:
//! - Configuration (host, port, security mode)
//! - TLS/plaintext stream abstraction
//! - Framed I/O with explicit literal reads

mod config;
mod framed;
mod stream;

pub use config::{Config, ConfigBuilder, Security};
pub use framed::{FramedStream, MAX_LITERAL_SIZE};
pub use stream::{ImapStream, connect_tcp, connect_tls};
