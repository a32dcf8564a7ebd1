//! ANONYMOUS mechanism (RFC 4505).
//!
//! Sends a fixed dummy trace token; servers that allow anonymous access
//! accept any token, so nothing user-identifying leaves the client.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::auth::{AuthOutcome, Exchange, Reply, outcome};
use crate::credentials::Account;
use crate::handler::MailboxHandler;
use crate::session::Session;
use crate::Result;

const TRACE_TOKEN: &[u8] = b"dummy";

pub(super) async fn attempt<S>(
    session: &mut Session<S>,
    handler: &mut dyn MailboxHandler,
    account: &Account,
) -> Result<AuthOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if !session.capabilities().supports_auth("ANONYMOUS") {
        return Ok(AuthOutcome::Unavailable("not advertised".to_string()));
    }

    // Anonymous access is only for accounts that asked for it. A named
    // user falling through to ANONYMOUS would be silently logged in as
    // nobody.
    if !(account.username.is_empty() || account.username.eq_ignore_ascii_case("anonymous")) {
        return Ok(AuthOutcome::Unavailable(
            "account has a named user".to_string(),
        ));
    }

    let mut exchange =
        Exchange::begin(session, handler, "ANONYMOUS", Some(TRACE_TOKEN)).await?;

    match exchange.next().await? {
        Reply::Done(completion) => Ok(outcome(completion)),
        Reply::Challenge(_) => {
            // One message is the whole mechanism; a second challenge
            // means the server is off-script.
            let completion = exchange.abort().await?;
            Ok(AuthOutcome::Failed(format!(
                "unexpected extra challenge ({})",
                completion.text
            )))
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

    fn guest() -> Account {
        Account::new("", "mail.example.com")
    }

    #[tokio::test]
    async fn test_anonymous_with_sasl_ir() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 SASL-IR AUTH=ANONYMOUS] hi\r\n")
            .write(b"A0000 AUTHENTICATE ANONYMOUS ZHVtbXk=\r\n")
            .read(b"A0000 OK anonymous access granted\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let result = attempt(&mut session, &mut NoopHandler, &guest())
            .await
            .unwrap();
        assert_eq!(result, AuthOutcome::Success);
    }

    #[tokio::test]
    async fn test_anonymous_without_sasl_ir() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 AUTH=ANONYMOUS] hi\r\n")
            .write(b"A0000 AUTHENTICATE ANONYMOUS\r\n")
            .read(b"+ \r\n")
            .write(b"ZHVtbXk=\r\n")
            .read(b"A0000 OK anonymous access granted\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let result = attempt(&mut session, &mut NoopHandler, &guest())
            .await
            .unwrap();
        assert_eq!(result, AuthOutcome::Success);
    }

    #[tokio::test]
    async fn test_anonymous_username_is_allowed() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 SASL-IR AUTH=ANONYMOUS] hi\r\n")
            .write(b"A0000 AUTHENTICATE ANONYMOUS ZHVtbXk=\r\n")
            .read(b"A0000 OK anonymous access granted\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let account = Account::new("Anonymous", "mail.example.com");
        let result = attempt(&mut session, &mut NoopHandler, &account)
            .await
            .unwrap();
        assert_eq!(result, AuthOutcome::Success);
    }

    #[tokio::test]
    async fn test_named_user_skips_anonymous() {
        // No write expectations: nothing may go out for a named account.
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 SASL-IR AUTH=ANONYMOUS] hi\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let account = Account::new("alice", "mail.example.com");
        let result = attempt(&mut session, &mut NoopHandler, &account)
            .await
            .unwrap();
        assert!(matches!(result, AuthOutcome::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_anonymous_not_advertised() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 AUTH=PLAIN] hi\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let result = attempt(&mut session, &mut NoopHandler, &guest())
            .await
            .unwrap();
        assert!(matches!(result, AuthOutcome::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_anonymous_rejected() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 SASL-IR AUTH=ANONYMOUS] hi\r\n")
            .write(b"A0000 AUTHENTICATE ANONYMOUS ZHVtbXk=\r\n")
            .read(b"A0000 NO anonymous access disabled\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let result = attempt(&mut session, &mut NoopHandler, &guest())
            .await
            .unwrap();
        assert_eq!(
            result,
            AuthOutcome::Failed("anonymous access disabled".to_string())
        );
    }
}
