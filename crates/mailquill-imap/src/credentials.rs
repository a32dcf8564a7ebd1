//! Collaborator traits for authentication.
//!
//! The engine never stores secrets and never links a Kerberos or SASL
//! library directly. Passwords, bearer tokens, GSSAPI contexts, and
//! generic SASL sessions all arrive through these seams, which keeps
//! the negotiator testable with in-memory fakes.

/// Account identity being authenticated.
#[derive(Debug, Clone)]
pub struct Account {
    /// Login name; may be empty when the caller wants anonymous access.
    pub username: String,
    /// Server hostname, used for GSSAPI service names and OAUTHBEARER.
    pub host: String,
}

impl Account {
    /// Creates an account identity.
    #[must_use]
    pub fn new(username: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            host: host.into(),
        }
    }
}

/// Supplies the account password on demand.
pub trait CredentialSource: Send {
    /// Prompts for (or looks up) the password.
    ///
    /// Returning `None` means the user cancelled; the negotiator stops
    /// the whole attempt rather than falling through to the next
    /// mechanism.
    fn password(&mut self, username: &str, host: &str) -> Option<String>;
}

/// Supplies OAuth bearer tokens on demand.
///
/// Token refresh is the caller's business; the engine just asks for a
/// currently valid token each time it needs one.
pub trait TokenSource: Send {
    /// Returns a valid bearer token for the user.
    ///
    /// # Errors
    ///
    /// Returns a human-readable message when no token can be produced.
    fn bearer_token(&mut self, username: &str) -> std::result::Result<String, String>;
}

/// Outcome of one GSSAPI context step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextStep {
    /// More rounds needed; send this token and await the next challenge.
    Continue(Vec<u8>),
    /// Context established; send this (possibly empty) token.
    Complete(Vec<u8>),
}

/// An established or in-progress GSSAPI security context.
pub trait SecurityContext: Send {
    /// Feeds a server token in, produces the next client token.
    ///
    /// # Errors
    ///
    /// Returns a human-readable message when the context fails.
    fn step(&mut self, input: &[u8]) -> std::result::Result<ContextStep, String>;

    /// Unwraps a protected message from the server.
    ///
    /// # Errors
    ///
    /// Returns a human-readable message when unwrapping fails.
    fn unwrap(&mut self, input: &[u8]) -> std::result::Result<Vec<u8>, String>;

    /// Wraps a message for the server (no encryption requested).
    ///
    /// # Errors
    ///
    /// Returns a human-readable message when wrapping fails.
    fn wrap(&mut self, input: &[u8]) -> std::result::Result<Vec<u8>, String>;
}

/// Creates GSSAPI security contexts.
pub trait ContextBuilder: Send {
    /// Starts a context for a service name like `imap@mail.example.com`.
    ///
    /// # Errors
    ///
    /// Returns a human-readable message when no context can be started
    /// (no credential cache, unknown realm). The negotiator treats this
    /// as "mechanism unavailable", not as an authentication failure.
    fn establish(&mut self, service: &str) -> std::result::Result<Box<dyn SecurityContext>, String>;
}

/// One in-progress generic SASL authentication.
pub trait SaslClient: Send {
    /// Mechanism name as negotiated, for the AUTHENTICATE command.
    fn mechanism(&self) -> &str;

    /// Produces the response to a decoded server challenge.
    ///
    /// # Errors
    ///
    /// Returns a human-readable message when the exchange cannot
    /// continue; the negotiator aborts the command.
    fn respond(&mut self, challenge: &[u8]) -> std::result::Result<Vec<u8>, String>;
}

/// Picks and starts a generic SASL mechanism.
pub trait SaslFactory: Send {
    /// Starts a client session for the best mechanism among `offered`.
    ///
    /// # Errors
    ///
    /// Returns a human-readable message when none of the offered
    /// mechanisms can be used; the negotiator treats this as
    /// "mechanism unavailable".
    fn begin(
        &mut self,
        offered: &[String],
        username: &str,
    ) -> std::result::Result<Box<dyn SaslClient>, String>;
}
