//! Human-quotable identifiers for completed submissions.
//!
//! Format: `SUB-<epoch millis, 13 digits>-<9 chars of A-Z0-9>`, for example
//! `SUB-1768478400000-7QK2M9XZA`. Identifiers are not guaranteed unique; the
//! store enforces uniqueness on the response's `submission_id` column.

use chrono::{DateTime, Utc};
use rand::Rng;

const PREFIX: &str = "SUB-";
const SUFFIX_LEN: usize = 9;
const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

pub fn generate_submission_id(now: DateTime<Utc>) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| char::from(ALPHABET[rng.random_range(0..ALPHABET.len())]))
        .collect();
    format!("{PREFIX}{:013}-{suffix}", now.timestamp_millis())
}

/// Checks the `^SUB-\d{13}-[A-Z0-9]{9}$` shape.
pub fn is_submission_id(candidate: &str) -> bool {
    let Some(rest) = candidate.strip_prefix(PREFIX) else {
        return false;
    };
    let Some((millis, suffix)) = rest.split_once('-') else {
        return false;
    };
    millis.len() == 13
        && millis.bytes().all(|b| b.is_ascii_digit())
        && suffix.len() == SUFFIX_LEN
        && suffix
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}
