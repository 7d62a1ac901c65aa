use std::time::Duration;

use native_tls::TlsConnector;
use tracing::debug;

use crate::smtp::dns::resolve_addrs;
use crate::smtp::error::SmtpError;
use crate::smtp::session::SmtpSession;

/// Port on which the server expects TLS from the first byte.
const IMPLICIT_TLS_PORT: u16 = 465;

/// Authenticated submission endpoint of a sending account.
#[derive(Debug, Clone, Copy)]
pub struct SubmissionServer<'a> {
    pub host: &'a str,
    pub port: u16,
    pub user: &'a str,
    pub secret: &'a str,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub from: String,
    pub to: String,
    /// Full RFC 5322 message (headers, blank line, body).
    pub payload: String,
}

/// Sends one message: connect, TLS (implicit or STARTTLS), AUTH LOGIN,
/// envelope, DATA. Returns the session transcript on success.
pub fn submit_message(
    server: &SubmissionServer<'_>,
    connector: &TlsConnector,
    message: &OutgoingMessage,
) -> Result<Vec<String>, SmtpError> {
    let addresses = resolve_addrs(server.host, server.port, true)?;
    if addresses.is_empty() {
        return Err(SmtpError::NoSmtpServers);
    }
    let mut session = SmtpSession::connect(server.host, &addresses, server.timeout)?;

    if server.port == IMPLICIT_TLS_PORT {
        session
            .stream
            .upgrade_tls(server.host, connector, server.timeout)?;
    }

    let banner = session.read_banner()?;
    if !banner.is_positive_completion() {
        return Err(SmtpError::rejected("CONNECT", banner.code, banner.text()));
    }

    let helo_name = message
        .from
        .rsplit_once('@')
        .map(|(_, domain)| domain)
        .unwrap_or("localhost");
    let helo_cmd = format!("EHLO {helo_name}");
    let ehlo = expect_ok(&mut session, &helo_cmd, "EHLO")?;

    if !session.stream.is_encrypted() {
        if !ehlo.has_capability("STARTTLS") {
            return Err(SmtpError::StartTlsUnavailable {
                host: server.host.to_string(),
            });
        }
        let reply = session.starttls(connector, server.timeout)?;
        if !reply.is_positive_completion() {
            return Err(SmtpError::rejected("STARTTLS", reply.code, reply.text()));
        }
        expect_ok(&mut session, &helo_cmd, "EHLO")?;
    }

    session.auth_login(server.user, server.secret)?;
    expect_ok(&mut session, &format!("MAIL FROM:<{}>", message.from), "MAIL FROM")?;
    expect_ok(&mut session, &format!("RCPT TO:<{}>", message.to), "RCPT TO")?;

    let reply = session.send_data(&message.payload)?;
    if !reply.is_positive_completion() {
        return Err(SmtpError::rejected("DATA", reply.code, reply.text()));
    }
    debug!(host = server.host, to = %message.to, "message accepted");

    session.quit().ok();
    Ok(std::mem::take(&mut session.transcript))
}

fn expect_ok(
    session: &mut SmtpSession,
    command: &str,
    label: &'static str,
) -> Result<crate::smtp::session::SmtpReply, SmtpError> {
    let reply = session.send_command(command)?;
    if reply.is_positive_completion() {
        Ok(reply)
    } else {
        Err(SmtpError::rejected(label, reply.code, reply.text()))
    }
}
