//! Authentication negotiation.
//!
//! The [`Authenticator`] walks an ordered list of mechanisms and
//! attempts each one that is usable: advertised by the server and
//! backed by the right collaborator. "Can't even try" (missing
//! capability, no Kerberos ticket, no token) moves on to the next
//! mechanism; an attempt the server actually rejected stops the scan,
//! because retrying other mechanisms after a real credential failure
//! only gets accounts locked.

mod anonymous;
mod cram_md5;
mod gssapi;
mod oauth;
mod sasl;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::credentials::{Account, ContextBuilder, CredentialSource, SaslFactory, TokenSource};
use crate::error::ProtocolError;
use crate::handler::MailboxHandler;
use crate::session::{Completion, Session, Step};
use crate::{Error, Result};

/// Result of one mechanism attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AuthOutcome {
    /// Server accepted the credentials.
    Success,
    /// The mechanism could not be attempted; try the next one.
    Unavailable(String),
    /// The mechanism ran and the server (or the exchange) rejected it.
    Failed(String),
}

/// Maps a tagged completion to an attempt outcome.
pub(crate) fn outcome(completion: Completion) -> AuthOutcome {
    if completion.is_ok() {
        AuthOutcome::Success
    } else {
        AuthOutcome::Failed(completion.text)
    }
}

/// The mechanisms the negotiator knows, in no particular order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MechanismKind {
    /// Kerberos via an external security context.
    Gssapi,
    /// Challenge/response keyed digest (RFC 2195).
    CramMd5,
    /// OAuth bearer token (RFC 7628).
    OAuthBearer,
    /// Proprietary OAuth bearer variant.
    XOAuth2,
    /// Anonymous access (RFC 4505).
    Anonymous,
    /// Whatever an external SASL library negotiates.
    Sasl,
}

impl MechanismKind {
    /// Mechanism label used in logs and errors.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Gssapi => "GSSAPI",
            Self::CramMd5 => "CRAM-MD5",
            Self::OAuthBearer => "OAUTHBEARER",
            Self::XOAuth2 => "XOAUTH2",
            Self::Anonymous => "ANONYMOUS",
            Self::Sasl => "SASL",
        }
    }
}

/// Default preference order, strongest first.
pub const DEFAULT_ORDER: [MechanismKind; 6] = [
    MechanismKind::Gssapi,
    MechanismKind::CramMd5,
    MechanismKind::OAuthBearer,
    MechanismKind::XOAuth2,
    MechanismKind::Anonymous,
    MechanismKind::Sasl,
];

/// Ordered mechanism scan with pluggable credential collaborators.
pub struct Authenticator {
    account: Account,
    order: Vec<MechanismKind>,
    credentials: Option<Box<dyn CredentialSource>>,
    tokens: Option<Box<dyn TokenSource>>,
    contexts: Option<Box<dyn ContextBuilder>>,
    sasl: Option<Box<dyn SaslFactory>>,
}

impl Authenticator {
    /// Creates a negotiator for `account` with the default order.
    #[must_use]
    pub fn new(account: Account) -> Self {
        Self {
            account,
            order: DEFAULT_ORDER.to_vec(),
            credentials: None,
            tokens: None,
            contexts: None,
            sasl: None,
        }
    }

    /// Replaces the mechanism preference order.
    #[must_use]
    pub fn order(mut self, order: Vec<MechanismKind>) -> Self {
        self.order = order;
        self
    }

    /// Supplies a password source (required for CRAM-MD5).
    #[must_use]
    pub fn with_credentials(mut self, source: Box<dyn CredentialSource>) -> Self {
        self.credentials = Some(source);
        self
    }

    /// Supplies a bearer token source (required for OAUTHBEARER/XOAUTH2).
    #[must_use]
    pub fn with_tokens(mut self, source: Box<dyn TokenSource>) -> Self {
        self.tokens = Some(source);
        self
    }

    /// Supplies a GSSAPI context builder.
    #[must_use]
    pub fn with_gssapi(mut self, builder: Box<dyn ContextBuilder>) -> Self {
        self.contexts = Some(builder);
        self
    }

    /// Supplies a generic SASL factory.
    #[must_use]
    pub fn with_sasl(mut self, factory: Box<dyn SaslFactory>) -> Self {
        self.sasl = Some(factory);
        self
    }

    /// Runs the mechanism scan until one succeeds.
    ///
    /// A `PREAUTH` session returns immediately.
    ///
    /// # Errors
    ///
    /// - [`Error::AuthFailed`] when a mechanism was attempted and
    ///   rejected; no further mechanisms are tried.
    /// - [`Error::Cancelled`] when the user dismissed a credential
    ///   prompt.
    /// - [`Error::AuthUnavailable`] when every mechanism was skipped.
    pub async fn authenticate<S>(
        &mut self,
        session: &mut Session<S>,
        handler: &mut dyn MailboxHandler,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if session.pre_authenticated() {
            tracing::debug!("session is pre-authenticated");
            return Ok(());
        }

        for kind in self.order.clone() {
            let outcome = match kind {
                MechanismKind::Gssapi => match self.contexts.as_deref_mut() {
                    Some(builder) => {
                        gssapi::attempt(session, handler, &self.account, builder).await?
                    }
                    None => AuthOutcome::Unavailable("no security context builder".to_string()),
                },
                MechanismKind::CramMd5 => match self.credentials.as_deref_mut() {
                    Some(source) => {
                        cram_md5::attempt(session, handler, &self.account, source).await?
                    }
                    None => AuthOutcome::Unavailable("no password source".to_string()),
                },
                MechanismKind::OAuthBearer => match self.tokens.as_deref_mut() {
                    Some(source) => {
                        oauth::attempt_oauthbearer(session, handler, &self.account, source).await?
                    }
                    None => AuthOutcome::Unavailable("no token source".to_string()),
                },
                MechanismKind::XOAuth2 => match self.tokens.as_deref_mut() {
                    Some(source) => {
                        oauth::attempt_xoauth2(session, handler, &self.account, source).await?
                    }
                    None => AuthOutcome::Unavailable("no token source".to_string()),
                },
                MechanismKind::Anonymous => {
                    anonymous::attempt(session, handler, &self.account).await?
                }
                MechanismKind::Sasl => match self.sasl.as_deref_mut() {
                    Some(factory) => {
                        sasl::attempt(session, handler, &self.account, factory).await?
                    }
                    None => AuthOutcome::Unavailable("no SASL factory".to_string()),
                },
            };

            match outcome {
                AuthOutcome::Success => {
                    tracing::info!(mechanism = kind.name(), "authenticated");
                    return Ok(());
                }
                AuthOutcome::Unavailable(reason) => {
                    tracing::debug!(mechanism = kind.name(), reason, "mechanism skipped");
                }
                AuthOutcome::Failed(message) => {
                    tracing::warn!(mechanism = kind.name(), message, "authentication failed");
                    return Err(Error::AuthFailed {
                        mechanism: kind.name().to_string(),
                        message,
                    });
                }
            }
        }

        Err(Error::AuthUnavailable)
    }
}

/// Reply pulled from an AUTHENTICATE exchange.
pub(crate) enum Reply {
    /// Decoded server challenge.
    Challenge(Vec<u8>),
    /// Tagged completion.
    Done(Completion),
}

/// One AUTHENTICATE command in flight.
///
/// Handles SASL-IR, base64 framing, and untagged traffic arriving in
/// the middle of the exchange.
pub(crate) struct Exchange<'a, S> {
    session: &'a mut Session<S>,
    handler: &'a mut dyn MailboxHandler,
    pending_initial: Option<Vec<u8>>,
}

impl<'a, S> Exchange<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Issues `AUTHENTICATE mechanism`, inlining `initial` when the
    /// server supports SASL-IR, otherwise deferring it to the first
    /// continuation.
    pub(crate) async fn begin(
        session: &'a mut Session<S>,
        handler: &'a mut dyn MailboxHandler,
        mechanism: &str,
        initial: Option<&[u8]>,
    ) -> Result<Self> {
        let mut pending_initial = None;
        let command = match initial {
            Some(payload) if session.capabilities().sasl_ir => {
                let encoded = STANDARD.encode(payload);
                // "=" is the wire form of an empty initial response.
                let encoded = if encoded.is_empty() { "=".to_string() } else { encoded };
                format!("AUTHENTICATE {mechanism} {encoded}")
            }
            Some(payload) => {
                pending_initial = Some(payload.to_vec());
                format!("AUTHENTICATE {mechanism}")
            }
            None => format!("AUTHENTICATE {mechanism}"),
        };
        session.issue(&command).await?;
        Ok(Self {
            session,
            handler,
            pending_initial,
        })
    }

    /// Pulls the next challenge or the completion.
    pub(crate) async fn next(&mut self) -> Result<Reply> {
        loop {
            match self.session.step().await? {
                Step::Continuation(prompt) => {
                    if let Some(initial) = self.pending_initial.take() {
                        self.send(&initial).await?;
                        continue;
                    }
                    let decoded = STANDARD.decode(prompt.trim()).map_err(|_| {
                        Error::Protocol(ProtocolError::Malformed(format!(
                            "challenge is not base64: {prompt}"
                        )))
                    })?;
                    return Ok(Reply::Challenge(decoded));
                }
                Step::Untagged(event) => {
                    self.session.dispatch(event, self.handler).await?;
                }
                Step::Done(completion) => return Ok(Reply::Done(completion)),
            }
        }
    }

    /// Sends a client response, base64 encoded.
    pub(crate) async fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.session.send_line(&STANDARD.encode(payload)).await
    }

    /// Sends an empty response line (the XOAUTH2 failure handshake).
    pub(crate) async fn send_empty(&mut self) -> Result<()> {
        self.session.send_line("").await
    }

    /// Cancels the exchange with `*` and waits for the completion.
    pub(crate) async fn abort(&mut self) -> Result<Completion> {
        self.session.send_line("*").await?;
        self.drain().await
    }

    /// Waits for the tagged completion; further challenges are a
    /// protocol violation at this point.
    pub(crate) async fn drain(&mut self) -> Result<Completion> {
        loop {
            match self.next().await? {
                Reply::Done(completion) => return Ok(completion),
                Reply::Challenge(_) => {
                    return Err(Error::Protocol(ProtocolError::Malformed(
                        "challenge after exchange ended".to_string(),
                    )));
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use crate::handler::NoopHandler;
    use tokio_test::io::Builder;

    #[test]
    fn test_default_order_prefers_gssapi() {
        assert_eq!(DEFAULT_ORDER[0], MechanismKind::Gssapi);
        assert_eq!(DEFAULT_ORDER[4], MechanismKind::Anonymous);
    }

    #[test]
    fn test_outcome_mapping() {
        use crate::wire::Status;
        let ok = Completion {
            status: Status::Ok,
            text: "done".to_string(),
        };
        assert_eq!(outcome(ok), AuthOutcome::Success);

        let no = Completion {
            status: Status::No,
            text: "bad creds".to_string(),
        };
        assert_eq!(outcome(no), AuthOutcome::Failed("bad creds".to_string()));
    }

    #[tokio::test]
    async fn test_everything_unavailable() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1] hi\r\n")
            .build();
        let mut session = Session::from_stream(mock).await.unwrap();

        // No collaborators, no AUTH= capabilities: every mechanism skips.
        let mut auth = Authenticator::new(Account::new("alice", "mail.example.com"));
        let err = auth
            .authenticate(&mut session, &mut NoopHandler)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AuthUnavailable));
    }

    #[tokio::test]
    async fn test_named_user_never_falls_back_to_anonymous() {
        // Server offers only ANONYMOUS; a named account must not take
        // it, so the scan exhausts without writing anything.
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 SASL-IR AUTH=ANONYMOUS] hi\r\n")
            .build();
        let mut session = Session::from_stream(mock).await.unwrap();

        let mut auth = Authenticator::new(Account::new("alice", "mail.example.com"));
        let err = auth
            .authenticate(&mut session, &mut NoopHandler)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AuthUnavailable));
    }

    #[tokio::test]
    async fn test_preauth_short_circuits() {
        let mock = Builder::new()
            .read(b"* PREAUTH [CAPABILITY IMAP4rev1] welcome back\r\n")
            .build();
        let mut session = Session::from_stream(mock).await.unwrap();

        let mut auth = Authenticator::new(Account::new("alice", "mail.example.com"));
        auth.authenticate(&mut session, &mut NoopHandler)
            .await
            .unwrap();
    }
}
