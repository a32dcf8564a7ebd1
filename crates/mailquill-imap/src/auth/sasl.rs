//! Generic SASL via an external library.
//!
//! When a [`SaslFactory`] is plugged in, whatever mechanism it selects
//! from the server's `AUTH=` list is driven through the same exchange
//! loop as the built-in mechanisms. With an empty username only
//! ANONYMOUS is offered to the factory, so a guest connection cannot
//! accidentally negotiate a mechanism that would prompt for secrets.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::auth::{AuthOutcome, Exchange, Reply, outcome};
use crate::credentials::{Account, SaslFactory};
use crate::handler::MailboxHandler;
use crate::session::Session;
use crate::Result;

pub(super) async fn attempt<S>(
    session: &mut Session<S>,
    handler: &mut dyn MailboxHandler,
    account: &Account,
    factory: &mut dyn SaslFactory,
) -> Result<AuthOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let offered: Vec<String> = if account.username.is_empty() {
        session
            .capabilities()
            .auth
            .iter()
            .filter(|m| m.as_str() == "ANONYMOUS")
            .cloned()
            .collect()
    } else {
        session.capabilities().auth.clone()
    };

    if offered.is_empty() {
        return Ok(AuthOutcome::Unavailable(
            "no usable mechanism advertised".to_string(),
        ));
    }

    let mut client = match factory.begin(&offered, &account.username) {
        Ok(client) => client,
        Err(reason) => return Ok(AuthOutcome::Unavailable(reason)),
    };
    let mechanism = client.mechanism().to_string();

    // With SASL-IR, client-first mechanisms inline their first message.
    let initial = if session.capabilities().sasl_ir {
        match client.respond(&[]) {
            Ok(response) => Some(response),
            Err(reason) => return Ok(AuthOutcome::Unavailable(reason)),
        }
    } else {
        None
    };

    let mut exchange =
        Exchange::begin(session, handler, &mechanism, initial.as_deref()).await?;

    loop {
        match exchange.next().await? {
            Reply::Done(completion) => return Ok(outcome(completion)),
            Reply::Challenge(challenge) => match client.respond(&challenge) {
                Ok(response) => exchange.send(&response).await?,
                Err(reason) => {
                    exchange.abort().await?;
                    return Ok(AuthOutcome::Failed(reason));
                }
            },
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
    use crate::credentials::SaslClient;
    use crate::handler::NoopHandler;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use tokio_test::io::Builder;

    struct ScramClient;

    impl SaslClient for ScramClient {
        fn mechanism(&self) -> &str {
            "SCRAM-SHA-256"
        }

        fn respond(&mut self, challenge: &[u8]) -> std::result::Result<Vec<u8>, String> {
            match challenge {
                b"" => Ok(b"client-first".to_vec()),
                b"server-first" => Ok(b"client-final".to_vec()),
                _ => Err(format!("unexpected challenge: {challenge:?}")),
            }
        }
    }

    struct ScramFactory {
        seen_offered: Vec<String>,
    }

    impl SaslFactory for ScramFactory {
        fn begin(
            &mut self,
            offered: &[String],
            _username: &str,
        ) -> std::result::Result<Box<dyn SaslClient>, String> {
            self.seen_offered = offered.to_vec();
            if offered.iter().any(|m| m == "SCRAM-SHA-256") {
                Ok(Box::new(ScramClient))
            } else {
                Err("nothing I support".to_string())
            }
        }
    }

    #[tokio::test]
    async fn test_generic_sasl_multi_round() {
        let first = STANDARD.encode(b"client-first");
        let command = format!("A0000 AUTHENTICATE SCRAM-SHA-256 {first}\r\n");
        let challenge = format!("+ {}\r\n", STANDARD.encode(b"server-first"));
        let final_msg = format!("{}\r\n", STANDARD.encode(b"client-final"));

        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 SASL-IR AUTH=SCRAM-SHA-256 AUTH=PLAIN] hi\r\n")
            .write(command.as_bytes())
            .read(challenge.as_bytes())
            .write(final_msg.as_bytes())
            .read(b"A0000 OK authenticated\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let account = Account::new("alice", "mail.example.com");
        let mut factory = ScramFactory {
            seen_offered: Vec::new(),
        };

        let result = attempt(&mut session, &mut NoopHandler, &account, &mut factory)
            .await
            .unwrap();
        assert_eq!(result, AuthOutcome::Success);
        assert_eq!(factory.seen_offered, vec!["SCRAM-SHA-256", "PLAIN"]);
    }

    #[tokio::test]
    async fn test_empty_username_offers_only_anonymous() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 AUTH=SCRAM-SHA-256 AUTH=PLAIN] hi\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let account = Account::new("", "mail.example.com");
        let mut factory = ScramFactory {
            seen_offered: Vec::new(),
        };

        // ANONYMOUS is not advertised, so the offered list is empty and
        // the factory is never consulted.
        let result = attempt(&mut session, &mut NoopHandler, &account, &mut factory)
            .await
            .unwrap();
        assert!(matches!(result, AuthOutcome::Unavailable(_)));
        assert!(factory.seen_offered.is_empty());
    }

    #[tokio::test]
    async fn test_factory_error_mid_exchange_aborts() {
        let first = STANDARD.encode(b"client-first");
        let command = format!("A0000 AUTHENTICATE SCRAM-SHA-256 {first}\r\n");
        let challenge = format!("+ {}\r\n", STANDARD.encode(b"garbage"));

        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 SASL-IR AUTH=SCRAM-SHA-256] hi\r\n")
            .write(command.as_bytes())
            .read(challenge.as_bytes())
            .write(b"*\r\n")
            .read(b"A0000 BAD authentication exchange cancelled\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let account = Account::new("alice", "mail.example.com");
        let mut factory = ScramFactory {
            seen_offered: Vec::new(),
        };

        let result = attempt(&mut session, &mut NoopHandler, &account, &mut factory)
            .await
            .unwrap();
        assert!(matches!(result, AuthOutcome::Failed(_)));
    }
}
