use std::fmt;

use serde::{Deserialize, Serialize};

/// Mailbox provider tag attached to every outcome.
///
/// Detection is plain substring matching on the domain; nothing here touches
/// DNS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Microsoft,
    Yahoo,
    #[default]
    Other,
}

const GOOGLE_HINTS: &[&str] = &["gmail", "googlemail", "google"];
const MICROSOFT_HINTS: &[&str] = &["outlook", "hotmail", "live", "msn", "microsoft"];
const YAHOO_HINTS: &[&str] = &["yahoo", "ymail"];

impl Provider {
    pub fn detect(domain: &str) -> Self {
        let domain = domain.to_ascii_lowercase();
        let hit = |hints: &[&str]| hints.iter().any(|h| domain.contains(h));
        if hit(GOOGLE_HINTS) {
            Self::Google
        } else if hit(MICROSOFT_HINTS) {
            Self::Microsoft
        } else if hit(YAHOO_HINTS) {
            Self::Yahoo
        } else {
            Self::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Microsoft => "microsoft",
            Self::Yahoo => "yahoo",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_major_providers() {
        assert_eq!(Provider::detect("gmail.com"), Provider::Google);
        assert_eq!(Provider::detect("Hotmail.fr"), Provider::Microsoft);
        assert_eq!(Provider::detect("ymail.com"), Provider::Yahoo);
        assert_eq!(Provider::detect("example.org"), Provider::Other);
    }
}
