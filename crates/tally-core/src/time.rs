//! Timestamp bucketing and seed-date parsing helpers.

use chrono::{NaiveDate, Utc};

use crate::{Error, Result};

const DAY: i64 = 24 * 3600;
const WEEK: i64 = 7 * DAY;

/// Week bucket for a timestamp. Jan 4th 1970 is the first Sunday in the
/// epoch, so weeks are shifted by three days to start on Sundays.
pub fn timestamp_to_week(timestamp: i64) -> i64 {
  (timestamp - 3 * DAY).div_euclid(WEEK)
}

/// Day bucket for a timestamp.
pub fn timestamp_to_day(timestamp: i64) -> i64 {
  timestamp.div_euclid(DAY)
}

/// Parse a human-entered seed date (`2011-Apr-21`) into unix seconds at
/// midnight UTC. An empty value means "open-ended" and maps to `0`;
/// the literal `now` maps to the current time.
pub fn date_to_timestamp(value: &str) -> Result<i64> {
  if value.is_empty() {
    return Ok(0);
  }
  if value == "now" {
    return Ok(Utc::now().timestamp());
  }
  let midnight = NaiveDate::parse_from_str(value, "%Y-%b-%d")
    .ok()
    .and_then(|date| date.and_hms_opt(0, 0, 0))
    .ok_or_else(|| Error::SeedDate(value.to_string()))?;
  Ok(midnight.and_utc().timestamp())
}

/// A permissive structural check for author emails: `local@domain.tld` with a
/// non-empty local part and a dotted domain. Anything failing this is treated
/// as an unattributable address, never as an error.
pub fn is_valid_email(email: &str) -> bool {
  let Some((local, domain)) = email.split_once('@') else {
    return false;
  };
  if local.is_empty() || domain.contains('@') {
    return false;
  }
  let mut parts = domain.split('.');
  let has_dot = domain.contains('.');
  has_dot && parts.all(|p| !p.is_empty())
}

/// The domain part of an email, if it looks like an email at all.
pub fn email_domain(email: &str) -> Option<&str> {
  email.split_once('@').map(|(_, domain)| domain)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn week_starts_on_sunday() {
    // Jan 4th 1970 00:00 UTC is the first Sunday.
    assert_eq!(timestamp_to_week(3 * DAY), 0);
    assert_eq!(timestamp_to_week(3 * DAY - 1), -1);
    assert_eq!(timestamp_to_week(10 * DAY), 1);
  }

  #[test]
  fn seed_dates_parse() {
    assert_eq!(date_to_timestamp("").unwrap(), 0);
    assert_eq!(date_to_timestamp("1970-Jan-02").unwrap(), DAY);
    assert!(date_to_timestamp("garbage").is_err());
  }

  #[test]
  fn email_validity() {
    assert!(is_valid_email("john@example.com"));
    assert!(is_valid_email("j.doe+tag@mail.example.co.jp"));
    assert!(!is_valid_email("error.root"));
    assert!(!is_valid_email("@example.com"));
    assert!(!is_valid_email("john@localhost"));
  }
}
