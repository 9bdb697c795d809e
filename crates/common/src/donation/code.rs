//! Redemption code generation and matching

use rand::Rng;

/// Length of a redemption code
pub const CODE_LENGTH: usize = 6;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// One random uppercase alphanumeric code
pub fn random_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Draw codes until one is not `is_taken`
pub fn generate_unique_code<R, F>(rng: &mut R, mut is_taken: F) -> String
where
    R: Rng + ?Sized,
    F: FnMut(&str) -> bool,
{
    loop {
        let candidate = random_code(rng);
        if !is_taken(&candidate) {
            return candidate;
        }
        tracing::debug!(code = %candidate, "Redemption code collided, drawing again");
    }
}

/// Case-insensitive comparison of a submitted code against the active one
pub fn codes_match(active: &str, submitted: &str) -> bool {
    active.eq_ignore_ascii_case(submitted.trim())
}
