use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::address::Address;
use crate::bounce::message::ScannedMessage;

/// Decides which addresses an inbound message reports as undeliverable.
pub trait BounceClassifier: Send + Sync {
    /// Empty when the message is not a delivery failure.
    fn bounced_addresses(&self, message: &ScannedMessage) -> BTreeSet<Address>;
}

pub const FAILURE_SUBJECTS: &[&str] = &[
    "delivery status notification",
    "undeliverable",
    "failed delivery",
    "mail delivery failed",
    "returned mail",
    "delivery failure",
    "delivery status",
    "failure notice",
    "mail delivery notification",
];

const ADMIN_SENDERS: &[&str] = &[
    "mailer-daemon",
    "postmaster",
    "mail delivery subsystem",
    "mail delivery system",
];

const ADDR: &str = r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}";

static ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(ADDR).expect("address regex is valid"));

static DSN_RECIPIENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?im)^(?:final|original)-recipient\s*:\s*(?:rfc822\s*;\s*)?<?({ADDR})"
    ))
    .expect("dsn regex is valid")
});

static FAILED_RECIPIENTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^x-failed-recipients\s*:\s*(.+)$").expect("failed-recipients regex is valid")
});

static VERIFICATION_ECHO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?im)^x-verification-email\s*:\s*<?({ADDR})"))
        .expect("verification regex is valid")
});

static PHRASE_BEFORE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)(?:failed recipient|failed address|delivery to the following recipients? failed|unknown user|user unknown|user not found|no such user|recipient rejected|invalid recipient|undeliverable to|mailbox unavailable|mailbox not found|address rejected|address not found|no such recipient|recipient not found|recipient address rejected|account does not exist|couldn't be delivered to|could not be delivered to)[^@]{{0,40}}?<?({ADDR})"
    ))
    .expect("phrase regex is valid")
});

static PHRASE_AFTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)<?({ADDR})>?[^\n@]{{0,60}}?(?:failed|undeliverable|unknown|not found|does not exist|doesn't exist|invalid|rejected|unavailable|no such|disabled|suspended|deactivated|inactive)"
    ))
    .expect("phrase regex is valid")
});

/// Rule table over subject keywords, administrative senders, DSN fields
/// and failure phrases.
#[derive(Debug, Clone, Default)]
pub struct PatternClassifier;

impl PatternClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn is_bounce(message: &ScannedMessage) -> bool {
        let from = message.from().to_ascii_lowercase();
        let subject = message.subject().to_ascii_lowercase();
        let report = message
            .header("content-type")
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("report-type=delivery-status"));

        report
            || ADMIN_SENDERS.iter().any(|s| from.contains(s))
            || FAILURE_SUBJECTS.iter().any(|k| subject.contains(k))
    }
}

impl BounceClassifier for PatternClassifier {
    fn bounced_addresses(&self, message: &ScannedMessage) -> BTreeSet<Address> {
        if !Self::is_bounce(message) {
            return BTreeSet::new();
        }

        let mut found = BTreeSet::new();
        let mut push = |raw: &str| {
            found.insert(Address::normalize(raw.trim_end_matches('.')));
        };

        for (name, value) in &message.headers {
            if name == "x-failed-recipients" {
                ADDRESS.find_iter(value).for_each(|m| push(m.as_str()));
            }
        }

        let body = message.body.as_str();
        for caps in DSN_RECIPIENT.captures_iter(body) {
            push(&caps[1]);
        }
        for caps in FAILED_RECIPIENTS.captures_iter(body) {
            ADDRESS.find_iter(&caps[1]).for_each(|m| push(m.as_str()));
        }
        for caps in VERIFICATION_ECHO.captures_iter(body) {
            push(&caps[1]);
        }
        for caps in PHRASE_BEFORE.captures_iter(body) {
            push(&caps[1]);
        }
        for caps in PHRASE_AFTER.captures_iter(body) {
            push(&caps[1]);
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(from: &str, subject: &str, body: &str) -> ScannedMessage {
        let raw = format!("From: {from}\r\nSubject: {subject}\r\n\r\n{body}");
        ScannedMessage::parse(raw.as_bytes())
    }

    fn addrs(set: &BTreeSet<Address>) -> Vec<&str> {
        set.iter().map(Address::as_str).collect()
    }

    #[test]
    fn dsn_fields_are_extracted() {
        let msg = message(
            "MAILER-DAEMON@mx.example",
            "Delivery Status Notification (Failure)",
            "Reporting-MTA: dns; mx.example\nFinal-Recipient: rfc822; Ghost@Example.org\nAction: failed\n",
        );
        let found = PatternClassifier.bounced_addresses(&msg);
        assert_eq!(addrs(&found), vec!["ghost@example.org"]);
    }

    #[test]
    fn failed_recipients_header_counts() {
        let raw = "From: postmaster@example.net\r\nSubject: Mail delivery failed\r\nX-Failed-Recipients: a@example.net, b@example.net\r\n\r\nsee above";
        let found = PatternClassifier.bounced_addresses(&ScannedMessage::parse(raw.as_bytes()));
        assert_eq!(addrs(&found), vec!["a@example.net", "b@example.net"]);
    }

    #[test]
    fn phrases_on_either_side() {
        let msg = message(
            "Mail Delivery Subsystem <mailer-daemon@googlemail.com>",
            "Undeliverable: Email Verification",
            "Delivery to the following recipient failed permanently:\n\n     nobody@example.com\n\nold@example.com: user unknown\n",
        );
        let found = PatternClassifier.bounced_addresses(&msg);
        assert!(found.contains(&Address::normalize("nobody@example.com")));
        assert!(found.contains(&Address::normalize("old@example.com")));
    }

    #[test]
    fn ordinary_mail_is_ignored() {
        let msg = message(
            "friend@example.com",
            "lunch?",
            "Final-Recipient: rfc822; someone@example.com",
        );
        assert!(PatternClassifier.bounced_addresses(&msg).is_empty());
    }

    #[test]
    fn echoed_verification_header_counts() {
        let msg = message(
            "postmaster@example.org",
            "Returned mail: see transcript",
            "----- Original message -----\nX-Batch-ID: bounce_1_deadbeef\nX-Verification-Email: lost@example.org\n",
        );
        let found = PatternClassifier.bounced_addresses(&msg);
        assert_eq!(addrs(&found), vec!["lost@example.org"]);
    }
}
