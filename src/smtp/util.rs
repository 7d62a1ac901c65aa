use rand::{Rng, distributions::Alphanumeric};

use crate::smtp::types::Existence;

/// Random alias used to detect catch-all servers. Lower-case so it never
/// collides with a normalised target.
pub fn random_local_part(len: usize) -> String {
    let length = len.clamp(6, 32);
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(|byte| char::from(byte).to_ascii_lowercase())
        .collect()
}

pub fn confidence_for(existence: &Existence) -> f32 {
    match existence {
        Existence::Exists | Existence::DoesNotExist => 0.95,
        Existence::CatchAll => 0.7,
        Existence::Indeterminate(_) => 0.4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_alias_is_clamped_and_lowercase() {
        let alias = random_local_part(2);
        assert_eq!(alias.len(), 6);
        assert_eq!(alias, alias.to_ascii_lowercase());
        assert_eq!(random_local_part(100).len(), 32);
    }
}
