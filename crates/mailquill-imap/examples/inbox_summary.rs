#![allow(clippy::expect_used, clippy::doc_markdown, clippy::uninlined_format_args)]
//! Example: Connect to an IMAP server and summarize the inbox
//!
//! Connects over implicit TLS, negotiates the strongest available
//! authentication mechanism, and prints one line per message in the
//! most recent batch.
//!
//! ## Running
//!
//! ```bash
//! IMAP_HOST=imap.example.com IMAP_USER=you@example.com \
//!     cargo run --package mailquill-imap --example inbox_summary
//! ```

use std::io::{self, Write};

use mailquill_imap::handler::LoggingHandler;
use mailquill_imap::{
    Account, Authenticator, Config, CredentialSource, Security, Session, fetch_headers,
};

/// Reads the password from stdin when the negotiator asks for it.
struct StdinPrompt;

impl CredentialSource for StdinPrompt {
    fn password(&mut self, username: &str, host: &str) -> Option<String> {
        print!("Password for {} at {}: ", username, host);
        io::stdout().flush().ok()?;
        let mut password = String::new();
        io::stdin().read_line(&mut password).ok()?;
        let password = password.trim();
        if password.is_empty() {
            None
        } else {
            Some(password.to_string())
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let host = std::env::var("IMAP_HOST").expect("set IMAP_HOST");
    let user = std::env::var("IMAP_USER").expect("set IMAP_USER");

    println!("Connecting to {}:993...", host);
    let config = Config::builder(&host).security(Security::Implicit).build();
    let stream = config.open().await?;

    let mut session = Session::from_stream(stream).await?;
    println!("✓ Connected ({} auth mechanisms offered)", session.capabilities().auth.len());

    let mut handler = LoggingHandler;
    Authenticator::new(Account::new(&user, &host))
        .with_credentials(Box::new(StdinPrompt))
        .authenticate(&mut session, &mut handler)
        .await?;
    println!("✓ Authenticated as {}\n", user);

    let text = session
        .run("SELECT INBOX", &mut handler)
        .await?
        .into_result()?;
    println!("INBOX selected: {}", text);

    let batch = fetch_headers(&mut session, &mut handler, 1, 25).await?;
    for record in batch.records() {
        let date = record
            .internal_date
            .map_or_else(|| "unknown date".to_string(), |d| d.to_rfc2822());
        println!(
            "#{:<4} {:>8} bytes  {}  {}",
            record.seq,
            record.size.unwrap_or(0),
            if record.flags.seen { " " } else { "*" },
            date,
        );
    }

    session.logout().await?;
    println!("\n✓ Logged out");
    Ok(())
}
