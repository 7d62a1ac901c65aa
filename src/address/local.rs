const ATEXT_SPECIALS: &[char] = &[
    '!', '#', '$', '%', '&', '\'', '*', '+', '-', '/', '=', '?', '^', '_', '`', '{', '|', '}',
    '~', '.',
];

/// Règles strictes: atext ASCII + '.' non initial/terminal, pas de ".."
pub(crate) fn is_local_strict(s: &str) -> bool {
    if s.is_empty() || s.starts_with('.') || s.ends_with('.') || s.contains("..") {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || ATEXT_SPECIALS.contains(&c))
}

/// Règles relaxed: quoted-string simple acceptée, sinon `is_local_strict`.
pub(crate) fn is_local_relaxed(s: &str) -> bool {
    let quoted = s.len() >= 2 && s.starts_with('"') && s.ends_with('"');
    quoted || is_local_strict(s)
}
