/// Valide le domaine: conversion IDNA + checks de labels.
/// Push des raisons invalidantes dans `reasons`, renvoie la forme ASCII
/// quand la conversion a réussi.
pub(crate) fn check_domain(domain: &str, reasons: &mut Vec<String>) -> Option<String> {
    if domain.is_empty() {
        reasons.push("domain missing".to_string());
        return None;
    }

    let domain_ascii = match idna::domain_to_ascii(domain) {
        Ok(d) => d,
        Err(_) => {
            reasons.push("domain punycode conversion failed".to_string());
            return None;
        }
    };

    if domain_ascii.is_empty() {
        reasons.push("domain empty after IDNA conversion".to_string());
        return None;
    }

    if !domain_ascii.contains('.') {
        reasons.push("domain must contain at least one dot".to_string());
    }

    for label in domain_ascii.split('.') {
        if let Some(reason) = label_problem(label) {
            reasons.push(reason);
        }
    }

    Some(domain_ascii)
}

fn label_problem(label: &str) -> Option<String> {
    if label.is_empty() {
        return Some("empty domain label".to_string());
    }
    if label.len() > 63 {
        return Some(format!(
            "domain label '{}' length {} > 63",
            label,
            label.len()
        ));
    }
    if label.starts_with('-') || label.ends_with('-') {
        return Some(format!(
            "domain label '{}' cannot start/end with '-'",
            label
        ));
    }
    if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Some(format!("domain label '{}' has invalid chars", label));
    }
    None
}
