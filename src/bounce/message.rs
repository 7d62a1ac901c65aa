use chrono::{DateTime, Utc};

use crate::address::Address;

/// Header carrying the batch id on every probe.
pub const BATCH_HEADER: &str = "X-Batch-ID";
/// Header naming the probed address; bounces usually quote it back.
pub const VERIFICATION_HEADER: &str = "X-Verification-Email";

/// A probe ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeMessage {
    pub from: String,
    pub to: Address,
    pub subject: String,
    /// Full RFC 5322 text, CRLF line endings.
    pub payload: String,
}

impl ProbeMessage {
    pub fn new(
        batch_id: &str,
        from: &str,
        to: &Address,
        subject_prefix: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let subject = format!("{subject_prefix} - {batch_id}");
        let sender_domain = from.rsplit_once('@').map_or("localhost", |(_, d)| d);
        let message_id = format!("<{}@{sender_domain}>", uuid::Uuid::new_v4().simple());

        let headers = [
            ("From", from.to_string()),
            ("To", to.to_string()),
            ("Subject", subject.clone()),
            ("Date", now.to_rfc2822()),
            ("Message-ID", message_id),
            ("MIME-Version", "1.0".to_string()),
            ("Content-Type", "text/plain; charset=utf-8".to_string()),
            (BATCH_HEADER, batch_id.to_string()),
            (VERIFICATION_HEADER, to.to_string()),
        ];
        let mut payload = String::new();
        for (name, value) in headers {
            payload.push_str(name);
            payload.push_str(": ");
            payload.push_str(&value);
            payload.push_str("\r\n");
        }
        payload.push_str("\r\n");
        payload.push_str(&format!(
            "This is an automated address check (batch {batch_id}).\r\n\
             No reply or action is needed.\r\n"
        ));

        Self {
            from: from.to_string(),
            to: to.clone(),
            subject,
            payload,
        }
    }
}

/// An inbound message as seen by the bounce classifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScannedMessage {
    /// Header names are lower-cased; folded lines are joined.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl ScannedMessage {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn from(&self) -> &str {
        self.header("from").unwrap_or_default()
    }

    pub fn subject(&self) -> &str {
        self.header("subject").unwrap_or_default()
    }

    /// Splits raw RFC 822 bytes into headers and body. Never fails: anything
    /// unparseable simply ends up in the body.
    pub fn parse(raw: &[u8]) -> Self {
        let text = String::from_utf8_lossy(raw).replace("\r\n", "\n");
        let (head, body) = text.split_once("\n\n").unwrap_or((text.as_str(), ""));

        let mut headers: Vec<(String, String)> = Vec::new();
        for line in head.lines() {
            if line.starts_with([' ', '\t']) {
                if let Some((_, value)) = headers.last_mut() {
                    value.push(' ');
                    value.push_str(line.trim());
                }
                continue;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
            }
        }

        // quoted-printable soft line breaks would split addresses in two
        let body = body.replace("=\n", "");
        Self { headers, body }
    }
}
