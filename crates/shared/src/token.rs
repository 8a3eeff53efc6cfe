//! Opaque token generation
//!
//! Two flavors: short uppercase suffixes for human-readable invoice numbers,
//! and longer mixed-case tracking codes that grant read-only portal access to
//! a project's progress. Both avoid ambiguous characters (0/O, 1/I/l).

use rand::Rng;

/// Alphabet without visually ambiguous characters.
const SUFFIX_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const CODE_ALPHABET: &[u8] = b"abcdefghjkmnpqrstuvwxyzABCDEFGHJKMNPQRSTUVWXYZ23456789";

fn sample(alphabet: &[u8], len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}

/// Random 4-character suffix for date-prefixed invoice numbers.
///
/// Collisions are possible (31^4 space per day); callers must collision-check
/// against the unique invoice_number constraint and retry.
pub fn invoice_number_suffix() -> String {
    sample(SUFFIX_ALPHABET, 4)
}

/// Random 20-character tracking code for client-facing project progress pages.
pub fn tracking_code() -> String {
    sample(CODE_ALPHABET, 20)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_length_and_alphabet() {
        for _ in 0..100 {
            let s = invoice_number_suffix();
            assert_eq!(s.len(), 4);
            assert!(s.bytes().all(|b| SUFFIX_ALPHABET.contains(&b)), "bad char in {s}");
        }
    }

    #[test]
    fn test_tracking_code_length() {
        let c = tracking_code();
        assert_eq!(c.len(), 20);
        assert!(c.bytes().all(|b| CODE_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_tracking_codes_unlikely_to_collide() {
        let a = tracking_code();
        let b = tracking_code();
        assert_ne!(a, b);
    }
}
