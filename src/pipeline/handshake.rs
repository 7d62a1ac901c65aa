use std::sync::Arc;

use crate::address::{Address, ValidationMode, check_syntax_with_mode};
use crate::outcome::Category;
use crate::pipeline::{Verdict, VerificationStrategy};
use crate::smtp::{Existence, HandshakeProbe};

/// RCPT-level mailbox check against the domain's mail servers.
pub struct HandshakeStrategy {
    probe: Arc<dyn HandshakeProbe>,
}

impl HandshakeStrategy {
    pub fn new(probe: Arc<dyn HandshakeProbe>) -> Self {
        Self { probe }
    }
}

impl VerificationStrategy for HandshakeStrategy {
    fn name(&self) -> &'static str {
        "handshake"
    }

    fn classify(&self, address: &Address) -> Verdict {
        // the syntax stage already ran with the configured mode
        let Ok(target) = check_syntax_with_mode(address, ValidationMode::Relaxed) else {
            return Verdict::Defer;
        };

        match self.probe.probe(&target) {
            Ok(report) => match report.result {
                Existence::Exists => {
                    Verdict::classified(Category::Valid, "mailbox accepted by server")
                }
                Existence::DoesNotExist => {
                    Verdict::classified(Category::Invalid, "mailbox rejected by server")
                }
                Existence::CatchAll => Verdict::classified(Category::Custom, "catch-all domain"),
                Existence::Indeterminate(_) => Verdict::Defer,
            },
            Err(err) => Verdict::classified(Category::Risky, err.to_string()),
        }
    }
}
