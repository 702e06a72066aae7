//! # Record Numbering
//!
//! Human-facing numbers for business records (bills, receipts) created by
//! the POS client.
//!
//! ## Format
//! ```text
//!   OFF-20261018-3FA9
//!   ─┬─ ───┬──── ──┬─
//!    │     │       └── 4 uppercase hex chars from a fresh UUID v4
//!    │     └────────── local calendar date (YYYYMMDD)
//!    └──────────────── prefix: 2-6 uppercase letters
//! ```
//!
//! The prefix marks where the number was minted. Records created while the
//! device was offline carry the offline prefix, so they stay visibly
//! distinct from numbers the remote service assigned itself. The random
//! fragment needs no coordination between devices.
//!
//! These numbers are unrelated to the queue's internal `id`, which is never
//! shown to users.

use chrono::{Local, NaiveDate};
use uuid::Uuid;

use crate::error::ValidationError;

/// Minimum prefix length.
pub const PREFIX_MIN_LEN: usize = 2;

/// Maximum prefix length.
pub const PREFIX_MAX_LEN: usize = 6;

/// Length of the random hex fragment.
pub const FRAGMENT_LEN: usize = 4;

/// Checks that a prefix is 2-6 ASCII uppercase letters.
pub fn validate_prefix(prefix: &str) -> Result<(), ValidationError> {
    if prefix.is_empty() {
        return Err(ValidationError::Required {
            field: "prefix".to_string(),
        });
    }

    if !(PREFIX_MIN_LEN..=PREFIX_MAX_LEN).contains(&prefix.len()) {
        return Err(ValidationError::LengthOutOfRange {
            field: "prefix".to_string(),
            min: PREFIX_MIN_LEN,
            max: PREFIX_MAX_LEN,
        });
    }

    if !prefix.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(ValidationError::InvalidFormat {
            field: "prefix".to_string(),
            reason: format!("'{}' must contain only A-Z", prefix),
        });
    }

    Ok(())
}

/// Builds `PREFIX-YYYYMMDD-XXXX` from its parts.
pub fn format_record_number(prefix: &str, date: NaiveDate, fragment: &str) -> String {
    format!("{}-{}-{}", prefix, date.format("%Y%m%d"), fragment)
}

/// Returns the first four hex digits of a fresh UUID v4, uppercased.
pub fn random_fragment() -> String {
    let simple = Uuid::new_v4().simple().to_string();
    simple[..FRAGMENT_LEN].to_ascii_uppercase()
}

/// Generates a record number for today's local date.
pub fn generate_record_number(prefix: &str) -> Result<String, ValidationError> {
    validate_prefix(prefix)?;
    Ok(format_record_number(
        prefix,
        Local::now().date_naive(),
        &random_fragment(),
    ))
}

/// Returns true if `number` is well-formed (`^[A-Z]{2,6}-\d{8}-[0-9A-F]{4}$`).
pub fn is_valid_record_number(number: &str) -> bool {
    let mut parts = number.split('-');
    let (Some(prefix), Some(date), Some(fragment), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };

    validate_prefix(prefix).is_ok()
        && date.len() == 8
        && date.chars().all(|c| c.is_ascii_digit())
        && fragment.len() == FRAGMENT_LEN
        && fragment
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
}

/// Returns true if `number` is well-formed and was minted with `offline_prefix`.
pub fn is_offline_number(number: &str, offline_prefix: &str) -> bool {
    is_valid_record_number(number)
        && number
            .split('-')
            .next()
            .is_some_and(|prefix| prefix == offline_prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_format_record_number() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 31).unwrap();
        assert_eq!(format_record_number("OFF", date, "0A1F"), "OFF-20260131-0A1F");
    }

    #[test]
    fn test_generated_number_matches_format() {
        let number = generate_record_number("OFF").unwrap();
        assert!(is_valid_record_number(&number), "bad number {}", number);
        assert!(number.starts_with("OFF-"));
        assert_eq!(number.len(), "OFF-".len() + 8 + 1 + FRAGMENT_LEN);
    }

    #[test]
    fn test_numbers_in_same_second_are_distinct() {
        // 16^4 possible fragments; 20 draws collide with probability < 0.3%
        let numbers: HashSet<String> = (0..20)
            .map(|_| generate_record_number("OFF").unwrap())
            .collect();
        assert!(numbers.len() >= 19);
    }

    #[test]
    fn test_prefix_validation() {
        assert!(validate_prefix("OF").is_ok());
        assert!(validate_prefix("OFFLIN").is_ok());
        assert!(matches!(
            validate_prefix(""),
            Err(ValidationError::Required { .. })
        ));
        assert!(matches!(
            validate_prefix("O"),
            Err(ValidationError::LengthOutOfRange { .. })
        ));
        assert!(matches!(
            validate_prefix("OFFLINE"),
            Err(ValidationError::LengthOutOfRange { .. })
        ));
        assert!(matches!(
            validate_prefix("off"),
            Err(ValidationError::InvalidFormat { .. })
        ));
        assert!(generate_record_number("o1").is_err());
    }

    #[test]
    fn test_record_number_recognition() {
        assert!(is_valid_record_number("INV-20260131-FFFF"));
        assert!(!is_valid_record_number("INV-2026013-FFFF"));
        assert!(!is_valid_record_number("INV-20260131-ffff"));
        assert!(!is_valid_record_number("INV-20260131-FFFG"));
        assert!(!is_valid_record_number("INV-20260131-FFFF-1"));
        assert!(!is_valid_record_number("20260131-01-0001"));

        assert!(is_offline_number("OFF-20260131-00AB", "OFF"));
        assert!(!is_offline_number("INV-20260131-00AB", "OFF"));
    }
}
