//! Address normalisation and syntax checks.
//!
//! Every address entering a job goes through [`Address::normalize`] (trim +
//! lower-case). [`check_syntax`] then decides whether it is well formed enough
//! to be handed to the network strategies; malformed input never leaves the
//! first pipeline stage.

mod charset;
mod domain;
mod error;
mod local;
mod provider;

pub use charset::{CharsetReport, analyze as analyze_charset};
pub use error::AddressError;
pub use provider::Provider;

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

use domain::check_domain;
use local::{is_local_relaxed, is_local_strict};

/// Rules applied to the local part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    #[default]
    Strict,
    Relaxed,
}

/// A normalised (trimmed, lower-cased) address.
///
/// Normalisation does not imply validity: use [`check_syntax`] before any
/// network lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn normalize(raw: &str) -> Self {
        Self(raw.trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Everything before the last `@` (the whole string when there is none).
    pub fn local(&self) -> &str {
        self.0.rsplit_once('@').map(|(l, _)| l).unwrap_or(&self.0)
    }

    /// Everything after the last `@` (empty when there is none).
    pub fn domain(&self) -> &str {
        self.0.rsplit_once('@').map(|(_, d)| d).unwrap_or("")
    }

    pub fn provider(&self) -> Provider {
        Provider::detect(self.domain())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Address {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Components of an address that passed [`check_syntax`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAddress {
    pub local: String,
    pub domain: String,
    pub ascii_domain: String,
}

pub fn check_syntax(address: &Address) -> Result<ParsedAddress, AddressError> {
    check_syntax_with_mode(address, ValidationMode::Strict)
}

pub fn check_syntax_with_mode(
    address: &Address,
    mode: ValidationMode,
) -> Result<ParsedAddress, AddressError> {
    let input = address.as_str();
    if input.is_empty() {
        return Err(AddressError::Empty);
    }

    let mut reasons = Vec::new();

    // RFC 5321: 254 max avec @
    if input.len() > 254 {
        reasons.push(format!("total length {} > 254", input.len()));
    }

    let parts: Vec<&str> = input.split('@').collect();
    if parts.len() != 2 {
        reasons.push("must contain exactly one '@'".to_string());
        return Err(AddressError::malformed(reasons));
    }
    let (local, domain) = (parts[0], parts[1]);

    if local.is_empty() || local.len() > 64 {
        reasons.push(format!(
            "local part length {} invalid (1..=64)",
            local.len()
        ));
    }

    let ascii_domain = check_domain(domain, &mut reasons);

    let local_ok = match mode {
        ValidationMode::Strict => is_local_strict(local),
        ValidationMode::Relaxed => is_local_relaxed(local),
    };
    if !local_ok {
        reasons.push(match mode {
            ValidationMode::Strict => "invalid local part (strict rules)".into(),
            ValidationMode::Relaxed => "invalid local part (relaxed rules)".into(),
        });
    }

    if !reasons.is_empty() {
        return Err(AddressError::malformed(reasons));
    }

    Ok(ParsedAddress {
        local: local.to_string(),
        domain: domain.to_string(),
        ascii_domain: ascii_domain.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_trims_and_lowercases() {
        let a = Address::normalize("  Alice@Example.COM ");
        assert_eq!(a.as_str(), "alice@example.com");
        assert_eq!(a.local(), "alice");
        assert_eq!(a.domain(), "example.com");
    }

    #[test]
    fn accepts_basic() {
        let parsed = check_syntax(&Address::normalize("alice@example.com")).unwrap();
        assert_eq!(parsed.ascii_domain, "example.com");
    }

    #[test]
    fn rejects_double_at() {
        let err = check_syntax(&Address::normalize("a@@b.com")).unwrap_err();
        assert!(matches!(err, AddressError::Malformed { .. }));
    }

    #[test]
    fn rejects_empty() {
        let err = check_syntax(&Address::normalize("   ")).unwrap_err();
        assert!(matches!(err, AddressError::Empty));
    }

    #[test]
    fn idn_domain_gets_ascii_form() {
        let parsed = check_syntax(&Address::normalize("alice@exämple.com")).unwrap();
        assert_eq!(parsed.ascii_domain, "xn--exmple-cua.com");
    }

    #[test]
    fn relaxed_mode_allows_quoted_local() {
        let quoted = Address::normalize("\"a.b\"@example.com");
        assert!(check_syntax(&quoted).is_err());
        assert!(check_syntax_with_mode(&quoted, ValidationMode::Relaxed).is_ok());
    }

    #[test]
    fn missing_at_has_no_domain() {
        let a = Address::normalize("nobody");
        assert_eq!(a.local(), "nobody");
        assert_eq!(a.domain(), "");
    }
}
