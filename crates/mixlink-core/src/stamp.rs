//! Timestamp suffix for files produced by sinks.

use chrono::Local;

/// Fixed-length (17 chars) local date-time string `YYYYMMDDhhmmssmmm`,
/// appended to recorder and snapshot file names.
pub fn date_time_string() -> String {
    Local::now().format("%Y%m%d%H%M%S%3f").to_string()
}

#[cfg(test)]
mod tests {
    use super::date_time_string;

    #[test]
    fn stamp_is_fixed_length_digits() {
        let s = date_time_string();
        assert_eq!(s.len(), 17);
        assert!(s.chars().all(|c| c.is_ascii_digit()));
    }
}
