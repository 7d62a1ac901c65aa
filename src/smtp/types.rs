use std::fmt;

use serde::{Deserialize, Serialize};

/// What the RCPT handshake observed for a mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Existence {
    /// Target accepted while random aliases were rejected.
    Exists,
    /// Target rejected with a definitive status code.
    DoesNotExist,
    /// The server accepts any recipient.
    CatchAll,
    /// Nothing conclusive (temporary failure, policy, timeout...).
    Indeterminate(String),
}

impl Existence {
    pub fn is_conclusive(&self) -> bool {
        matches!(self, Self::Exists | Self::DoesNotExist)
    }
}

impl fmt::Display for Existence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exists => f.write_str("Exists"),
            Self::DoesNotExist => f.write_str("DoesNotExist"),
            Self::CatchAll => f.write_str("CatchAll"),
            Self::Indeterminate(reason) => write!(f, "Indeterminate ({reason})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmtpProbeReport {
    pub result: Existence,
    pub mx_tried: Vec<String>,
    pub transcript: Vec<String>,
    pub confidence: f32,
}

impl SmtpProbeReport {
    pub fn new(result: Existence, mx_tried: Vec<String>, transcript: Vec<String>) -> Self {
        let confidence = crate::smtp::util::confidence_for(&result);
        Self {
            result,
            mx_tried,
            transcript,
            confidence,
        }
    }
}
