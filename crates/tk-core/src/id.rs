use std::collections::HashSet;

use rand::Rng;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Collisions tolerated at the configured length before escalating to four
/// characters.
const MAX_ATTEMPTS: usize = 3;

/// Generate one random base-36 id of the given length.
pub fn random_id(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Mint a new short id that does not collide with `existing`.
///
/// Tries `id_length` first; after `MAX_ATTEMPTS` collisions the length
/// escalates to 4 and minting continues until a free id is found (the
/// 4-char space is ~1.7M ids, far beyond any realistic repository).
pub fn mint_id(existing: &HashSet<String>, id_length: u8) -> String {
    let len = usize::from(id_length).clamp(3, 4);
    for _ in 0..MAX_ATTEMPTS {
        let id = random_id(len);
        if !existing.contains(&id) {
            return id;
        }
    }
    loop {
        let id = random_id(4);
        if !existing.contains(&id) {
            return id;
        }
    }
}

/// Compose the global form `<project>:<short>`.
pub fn global_id(project: &str, short: &str) -> String {
    format!("{project}:{short}")
}

/// Split a global id back into `(project, short)`; a bare short id yields
/// no project component.
pub fn split_global(id: &str) -> (Option<&str>, &str) {
    match id.rsplit_once(':') {
        Some((project, short)) => (Some(project), short),
        None => (None, id),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::is_valid_id;

    #[test]
    fn random_id_is_well_formed() {
        for _ in 0..100 {
            assert!(is_valid_id(&random_id(3)));
            assert!(is_valid_id(&random_id(4)));
        }
    }

    #[test]
    fn mint_avoids_collisions() {
        let mut existing = HashSet::new();
        for _ in 0..200 {
            let id = mint_id(&existing, 3);
            assert!(!existing.contains(&id));
            existing.insert(id);
        }
    }

    #[test]
    fn mint_escalates_when_space_exhausted() {
        // Saturate the entire 3-char space; minting must fall through to
        // 4 characters instead of spinning.
        let mut existing = HashSet::new();
        for a in ALPHABET {
            for b in ALPHABET {
                for c in ALPHABET {
                    existing.insert(format!("{}{}{}", *a as char, *b as char, *c as char));
                }
            }
        }
        let id = mint_id(&existing, 3);
        assert_eq!(id.len(), 4);
    }

    #[test]
    fn configured_length_four_respected() {
        let id = mint_id(&HashSet::new(), 4);
        assert_eq!(id.len(), 4);
    }

    #[test]
    fn global_id_round_trip() {
        let g = global_id("octo/widgets", "a1b");
        assert_eq!(g, "octo/widgets:a1b");
        assert_eq!(split_global(&g), (Some("octo/widgets"), "a1b"));
        assert_eq!(split_global("a1b"), (None, "a1b"));
    }
}
