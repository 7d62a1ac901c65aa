//! Account-level transports. Both traits are blocking; the engine runs them
//! on the blocking pool.

use chrono::{DateTime, Utc};

use crate::bounce::error::TransportError;
use crate::bounce::message::{ProbeMessage, ScannedMessage};
use crate::config::Account;

pub trait ProbeSender: Send + Sync {
    fn send(&self, account: &Account, message: &ProbeMessage) -> Result<(), TransportError>;
}

/// Fetches candidate delivery-failure messages for a batch from one
/// account's inbox.
pub trait MailboxScanner: Send + Sync {
    fn scan(
        &self,
        account: &Account,
        batch_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ScannedMessage>, TransportError>;
}

/// Stand-in when the crate is built without network transports.
#[cfg(not(feature = "with-smtp-verify"))]
pub(crate) struct Unsupported;

#[cfg(not(feature = "with-smtp-verify"))]
impl ProbeSender for Unsupported {
    fn send(&self, account: &Account, _message: &ProbeMessage) -> Result<(), TransportError> {
        Err(TransportError::unavailable(
            &account.address,
            "built without with-smtp-verify",
        ))
    }
}

#[cfg(not(feature = "with-smtp-verify"))]
impl MailboxScanner for Unsupported {
    fn scan(
        &self,
        account: &Account,
        _batch_id: &str,
        _since: DateTime<Utc>,
    ) -> Result<Vec<ScannedMessage>, TransportError> {
        Err(TransportError::unavailable(
            &account.address,
            "built without with-smtp-verify",
        ))
    }
}

#[cfg(feature = "with-smtp-verify")]
pub use real::{ImapMailboxScanner, SmtpProbeSender};

#[cfg(feature = "with-smtp-verify")]
mod real {
    use std::collections::BTreeSet;
    use std::time::Duration;

    use chrono::{DateTime, Utc};
    use native_tls::TlsConnector;
    use tracing::{debug, warn};

    use super::{MailboxScanner, ProbeSender};
    use crate::bounce::classifier::FAILURE_SUBJECTS;
    use crate::bounce::error::TransportError;
    use crate::bounce::message::{BATCH_HEADER, ProbeMessage, ScannedMessage};
    use crate::config::Account;
    use crate::imap::{ImapError, ImapServer, ImapSession, quote};
    use crate::smtp::{OutgoingMessage, SmtpError, SubmissionServer, submit_message};

    /// Upper bound on messages fetched per account and scan.
    const MAX_FETCH: usize = 200;

    pub struct SmtpProbeSender {
        connector: TlsConnector,
        timeout: Duration,
    }

    impl SmtpProbeSender {
        pub fn new(timeout: Duration) -> Result<Self, TransportError> {
            let connector =
                TlsConnector::new().map_err(|err| TransportError::unavailable("tls", err))?;
            Ok(Self { connector, timeout })
        }
    }

    impl ProbeSender for SmtpProbeSender {
        fn send(&self, account: &Account, message: &ProbeMessage) -> Result<(), TransportError> {
            let server = SubmissionServer {
                host: &account.outbound_host,
                port: account.outbound_port,
                user: &account.address,
                secret: &account.credential,
                timeout: Some(self.timeout),
            };
            let outgoing = OutgoingMessage {
                from: message.from.clone(),
                to: message.to.to_string(),
                payload: message.payload.clone(),
            };
            submit_message(&server, &self.connector, &outgoing)
                .map(|_| ())
                .map_err(|err| map_smtp_error(account, err, self.timeout))
        }
    }

    fn map_smtp_error(account: &Account, err: SmtpError, timeout: Duration) -> TransportError {
        match err {
            SmtpError::Rejected { .. } => TransportError::Rejected(err.to_string()),
            SmtpError::Io { source } if is_timeout(&source) => TransportError::Timeout(timeout),
            other => TransportError::unavailable(&account.address, other),
        }
    }

    fn is_timeout(err: &std::io::Error) -> bool {
        matches!(
            err.kind(),
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
        )
    }

    pub struct ImapMailboxScanner {
        connector: TlsConnector,
        timeout: Duration,
    }

    impl ImapMailboxScanner {
        pub fn new(timeout: Duration) -> Result<Self, TransportError> {
            let connector =
                TlsConnector::new().map_err(|err| TransportError::unavailable("tls", err))?;
            Ok(Self { connector, timeout })
        }

        fn scan_inbox(
            &self,
            account: &Account,
            batch_id: &str,
            since: DateTime<Utc>,
        ) -> Result<Vec<ScannedMessage>, ImapError> {
            let server = ImapServer {
                host: &account.inbound_host,
                port: account.inbound_port,
                user: &account.address,
                secret: &account.credential,
                timeout: Some(self.timeout),
            };
            let mut session = ImapSession::login(&server, &self.connector)?;
            session.select("INBOX")?;

            let since = since.format("%d-%b-%Y").to_string();
            let mut sequence: BTreeSet<u32> = BTreeSet::new();
            sequence.extend(session.search(&format!(
                "HEADER {BATCH_HEADER} {}",
                quote(batch_id)
            ))?);
            for keyword in FAILURE_SUBJECTS {
                let criteria = format!("SINCE {since} SUBJECT {}", quote(keyword));
                match session.search(&criteria) {
                    Ok(found) => sequence.extend(found),
                    Err(err) => debug!(keyword, error = %err, "subject search failed"),
                }
            }

            let mut messages = Vec::new();
            for seq in sequence.into_iter().rev().take(MAX_FETCH) {
                if let Some(raw) = session.fetch_rfc822(seq)? {
                    messages.push(ScannedMessage::parse(&raw));
                    if let Err(err) = session.mark_seen(seq) {
                        warn!(seq, error = %err, "could not flag message as seen");
                    }
                }
            }
            session.logout();
            Ok(messages)
        }
    }

    impl MailboxScanner for ImapMailboxScanner {
        fn scan(
            &self,
            account: &Account,
            batch_id: &str,
            since: DateTime<Utc>,
        ) -> Result<Vec<ScannedMessage>, TransportError> {
            self.scan_inbox(account, batch_id, since)
                .map_err(|err| match err {
                    ImapError::Io { source } if is_timeout(&source) => {
                        TransportError::Timeout(self.timeout)
                    }
                    other => TransportError::unavailable(&account.address, other),
                })
        }
    }
}
