use std::sync::Arc;

use native_tls::TlsConnector;
use tracing::debug;

use crate::address::ParsedAddress;
use crate::mx::LookupMx;
use crate::smtp::dns::{HostCandidate, resolve_hosts};
use crate::smtp::error::SmtpError;
use crate::smtp::options::SmtpProbeOptions;
use crate::smtp::session::{SmtpReply, SmtpSession};
use crate::smtp::types::{Existence, SmtpProbeReport};
use crate::smtp::util::random_local_part;

/// RCPT-level mailbox check. The handshake strategy only sees this trait so
/// tests can script the server side.
pub trait HandshakeProbe: Send + Sync {
    fn probe(&self, target: &ParsedAddress) -> Result<SmtpProbeReport, SmtpError>;
}

/// Blocking handshake against the real MX hosts of the target domain.
pub struct SmtpHandshake {
    resolver: Arc<dyn LookupMx>,
    connector: TlsConnector,
    options: SmtpProbeOptions,
}

impl SmtpHandshake {
    pub fn new(resolver: Arc<dyn LookupMx>, options: SmtpProbeOptions) -> Result<Self, SmtpError> {
        let connector = TlsConnector::new().map_err(|source| SmtpError::Tls { source })?;
        Ok(Self {
            resolver,
            connector,
            options,
        })
    }
}

impl HandshakeProbe for SmtpHandshake {
    fn probe(&self, target: &ParsedAddress) -> Result<SmtpProbeReport, SmtpError> {
        let domain = target.ascii_domain.as_str();
        if domain.is_empty() {
            return Err(SmtpError::InvalidEmail {
                reasons: vec!["domain missing".to_string()],
            });
        }

        let options = &self.options;
        let hosts = resolve_hosts(self.resolver.as_ref(), domain, options.max_mx, options.ipv6)?;

        let fallback_mail_from = format!("postmaster@{domain}");
        let mail_from = options.mail_from(&fallback_mail_from);
        let helo = options.helo_name(domain);
        let catchall_locals: Vec<String> = (0..options.catchall_probes.min(5))
            .map(|_| random_local_part(target.local.len()))
            .collect();
        let dialogue = Dialogue {
            local: &target.local,
            domain,
            mail_from: &mail_from,
            helo: &helo,
            catchall_locals: &catchall_locals,
        };

        let mut mx_tried = Vec::new();
        let mut transcripts = Vec::new();
        let mut last_result = Existence::Indeterminate("no server responded".to_string());

        for candidate in hosts {
            mx_tried.push(candidate.host.clone());
            match self.probe_host(&candidate, &dialogue) {
                Ok(report) => {
                    transcripts.extend(report.transcript);
                    if report.existence.is_conclusive() {
                        return Ok(SmtpProbeReport::new(
                            report.existence,
                            mx_tried,
                            transcripts,
                        ));
                    }
                    last_result = report.existence;
                }
                Err(err) => {
                    debug!(host = %candidate.host, error = %err, "handshake failed");
                    transcripts.push(format!("[{}] ! error: {err}", candidate.host));
                    last_result = Existence::Indeterminate(err.to_string());
                }
            }
        }

        Ok(SmtpProbeReport::new(last_result, mx_tried, transcripts))
    }
}

struct Dialogue<'a> {
    local: &'a str,
    domain: &'a str,
    mail_from: &'a str,
    helo: &'a str,
    catchall_locals: &'a [String],
}

struct HostReport {
    existence: Existence,
    transcript: Vec<String>,
}

fn finish(mut session: SmtpSession, existence: Existence) -> HostReport {
    session.quit().ok();
    HostReport {
        existence,
        transcript: std::mem::take(&mut session.transcript),
    }
}

impl SmtpHandshake {
    fn probe_host(
        &self,
        candidate: &HostCandidate,
        target: &Dialogue<'_>,
    ) -> Result<HostReport, SmtpError> {
        let timeout = self.options.timeout();
        let mut session = SmtpSession::connect(&candidate.host, &candidate.addresses, timeout)?;
        let banner = session.read_banner()?;
        if banner.code == 521 {
            return Ok(finish(
                session,
                Existence::Indeterminate("server does not receive mail".to_string()),
            ));
        }

        let helo_cmd = format!("EHLO {}", target.helo);
        let ehlo = session.send_command(&helo_cmd)?;

        let starttls_advertised = ehlo.has_capability("STARTTLS");
        if self.options.starttls_required && !starttls_advertised {
            let reason = format!("STARTTLS required but not offered by {}", candidate.host);
            return Ok(finish(session, Existence::Indeterminate(reason)));
        }

        if starttls_advertised {
            let tls_reply = session.starttls(&self.connector, timeout)?;
            if !tls_reply.is_positive_completion() {
                let reason = format!(
                    "STARTTLS rejected by {} (code {})",
                    candidate.host, tls_reply.code
                );
                return Ok(finish(session, Existence::Indeterminate(reason)));
            }
            session.send_command(&helo_cmd)?;
        }

        let envelope = if target.mail_from.is_empty() {
            "MAIL FROM:<>".to_string()
        } else {
            format!("MAIL FROM:<{}>", target.mail_from)
        };
        let mail_reply = session.send_command(&envelope)?;
        if mail_reply.is_permanent_failure() {
            let reason = format!("MAIL FROM rejected with {}", mail_reply.code);
            return Ok(finish(session, Existence::Indeterminate(reason)));
        }

        let target_reply =
            session.send_command(&format!("RCPT TO:<{}@{}>", target.local, target.domain))?;
        match classify_target(&target_reply) {
            TargetExistence::DoesNotExist => {
                return Ok(finish(session, Existence::DoesNotExist));
            }
            TargetExistence::Indeterminate(reason) => {
                return Ok(finish(session, Existence::Indeterminate(reason)));
            }
            TargetExistence::Accepted => {}
        }

        if target.catchall_locals.is_empty() {
            return Ok(finish(
                session,
                Existence::Indeterminate("catch-all probes disabled".to_string()),
            ));
        }

        let mut accepted_random = 0usize;
        let mut rejected_random = 0usize;
        let mut tempfail_random = 0usize;

        for alias in target.catchall_locals {
            if alias == target.local {
                continue;
            }
            let reply = session.send_command(&format!("RCPT TO:<{alias}@{}>", target.domain))?;
            if reply.is_positive_completion() {
                accepted_random += 1;
            } else if is_permanent_no_mailbox(&reply) {
                rejected_random += 1;
            } else if reply.is_transient_failure() {
                tempfail_random += 1;
            }
        }

        session.send_command("RSET").ok();

        let existence = if accepted_random > 0 {
            Existence::CatchAll
        } else if rejected_random > 0 && tempfail_random == 0 {
            Existence::Exists
        } else if tempfail_random > 0 {
            Existence::Indeterminate("temporary failure on catch-all probes".to_string())
        } else {
            Existence::Indeterminate("ambiguous catch-all probes".to_string())
        };
        Ok(finish(session, existence))
    }
}

enum TargetExistence {
    Accepted,
    DoesNotExist,
    Indeterminate(String),
}

fn classify_target(reply: &SmtpReply) -> TargetExistence {
    if reply.is_positive_completion() {
        return TargetExistence::Accepted;
    }
    if is_permanent_no_mailbox(reply) {
        return TargetExistence::DoesNotExist;
    }
    if reply.code == 521 {
        return TargetExistence::Indeterminate("521 host does not accept mail".to_string());
    }
    if reply.is_transient_failure() {
        return TargetExistence::Indeterminate(format!("temporary failure {}", reply.code));
    }
    TargetExistence::Indeterminate(format!("unexpected response {}", reply.code))
}

fn is_permanent_no_mailbox(reply: &SmtpReply) -> bool {
    matches!(reply.code, 550 | 551 | 553)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(code: u16) -> SmtpReply {
        SmtpReply {
            code,
            lines: vec!["text".into()],
        }
    }

    #[test]
    fn classify_target_maps_codes() {
        assert!(matches!(classify_target(&reply(250)), TargetExistence::Accepted));
        assert!(matches!(
            classify_target(&reply(550)),
            TargetExistence::DoesNotExist
        ));
        assert!(matches!(
            classify_target(&reply(451)),
            TargetExistence::Indeterminate(reason) if reason == "temporary failure 451"
        ));
        assert!(matches!(
            classify_target(&reply(521)),
            TargetExistence::Indeterminate(_)
        ));
    }
}
