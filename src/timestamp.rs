//! `updated_at`/`created_at` values in the format the sync endpoint orders by.

use chrono::{DateTime, Utc};

use crate::db::Param;

pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current UTC time, to the second.
pub fn now() -> String {
    format(Utc::now())
}

pub fn format(at: DateTime<Utc>) -> String {
    at.format(FORMAT).to_string()
}

/// Appends the current timestamp `count` times, e.g. for trailing
/// `created_at, updated_at` placeholders.
pub fn with_timestamps(count: usize, params: &mut Vec<Param>) {
    let stamp = now();
    params.extend(std::iter::repeat(Param::Text(stamp)).take(count));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDateTime, TimeZone};

    #[test]
    fn test_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(format(at), "2024-03-09 07:05:01");
    }

    #[test]
    fn test_now_parses_back() {
        let stamp = now();
        assert!(NaiveDateTime::parse_from_str(&stamp, FORMAT).is_ok());
        assert_eq!(stamp.len(), 19);
    }

    #[test]
    fn test_with_timestamps_appends() {
        let mut params = vec![Param::from("label")];
        with_timestamps(2, &mut params);

        assert_eq!(params.len(), 3);
        assert_eq!(params[1], params[2]);
        assert!(matches!(&params[1], Param::Text(s) if s.len() == 19));
    }

    #[test]
    fn test_with_zero_timestamps() {
        let mut params = Vec::new();
        with_timestamps(0, &mut params);
        assert!(params.is_empty());
    }
}
