//! # mailquill-imap
//!
//! An IMAP client protocol engine built around a strict framing rule:
//! lines are read as lines, literals are read only when the caller asks
//! for them and says where the bytes go. On top of that sit a tagged
//! command correlator, a pluggable authentication negotiator, bulk
//! header retrieval, a rotating full-message file cache, and a
//! CRLF-normalizing APPEND encoder.
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailquill_imap::{Account, Authenticator, Config, MessageCache, Session};
//! use mailquill_imap::handler::LoggingHandler;
//!
//! #[tokio::main]
//! async fn main() -> mailquill_imap::Result<()> {
//!     let config = Config::new("imap.example.com");
//!     let stream = config.open().await?;
//!     let mut session = Session::from_stream(stream).await?;
//!
//!     let mut handler = LoggingHandler;
//!     let account = Account::new("user@example.com", "imap.example.com");
//!     Authenticator::new(account)
//!         .with_credentials(Box::new(PasswordPrompt))
//!         .authenticate(&mut session, &mut handler)
//!         .await?;
//!
//!     session.run("SELECT INBOX", &mut handler).await?.into_result()?;
//!     let batch =
//!         mailquill_imap::fetch_headers(&mut session, &mut handler, 1, 50).await?;
//!     for record in batch.records() {
//!         println!("#{} {} bytes", record.seq, record.size.unwrap_or(0));
//!     }
//!
//!     let mut cache = MessageCache::with_default_slots("/tmp/mail");
//!     let id = mailquill_imap::MessageId::new(uidvalidity, batch.records()[0].seq);
//!     let msg = cache.fetch(&mut session, &mut handler, id).await?;
//!     println!("cached at {}", msg.path.display());
//!
//!     session.logout().await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`connection`]: transport setup and framed I/O
//! - [`wire`]: response line classification
//! - [`session`]: tagged command correlation
//! - [`auth`]: mechanism negotiation (GSSAPI, CRAM-MD5, OAUTHBEARER,
//!   XOAUTH2, ANONYMOUS, generic SASL)
//! - [`fetch`]: bulk header batches and the message cache
//! - [`append`]: CRLF-normalized uploads
//! - [`handler`]: unsolicited response callbacks
//! - [`credentials`]: collaborator traits for secrets and contexts
//! - [`types`]: identifiers, capabilities, flags

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod append;
pub mod auth;
pub mod connection;
pub mod credentials;
mod error;
pub mod fetch;
pub mod handler;
pub mod parser;
pub mod session;
pub mod types;
pub mod wire;

pub use append::append;
pub use auth::{Authenticator, MechanismKind};
pub use connection::{Config, ConfigBuilder, FramedStream, ImapStream, Security};
pub use credentials::{
    Account, ContextBuilder, ContextStep, CredentialSource, SaslClient, SaslFactory,
    SecurityContext, TokenSource,
};
pub use error::{Error, ProtocolError, Result};
pub use fetch::{
    CachedMessage, HeaderBatch, HeaderRecord, MessageCache, MessageHeaders, fetch_headers,
};
pub use handler::{CollectingHandler, LoggingHandler, MailboxHandler, NoopHandler};
pub use parser::{FetchFieldParser, FetchFields};
pub use session::{Completion, Session, Step, TagGenerator, UntaggedEvent};
pub use types::{Capabilities, MessageFlags, MessageId, SeqNum, Tag};
pub use wire::{LiteralMarker, ServerReply, Status};

/// IMAP protocol version this engine targets.
pub const IMAP_VERSION: &str = "IMAP4rev1";
