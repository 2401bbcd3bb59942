//! `Retry-After` parsing.

use std::time::Duration;

use chrono::DateTime;
use chrono::NaiveDateTime;
use chrono::Utc;

/// Obsolete HTTP-date layouts, always in GMT.
const OBSOLETE_DATE_FORMATS: [&str; 2] = [
    // RFC 850: `Sunday, 06-Nov-94 08:49:37 GMT`
    "%A, %d-%b-%y %H:%M:%S GMT",
    // asctime: `Sun Nov  6 08:49:37 1994`
    "%a %b %e %H:%M:%S %Y",
];

/// Decodes a `Retry-After` value into a wait duration.
///
/// Accepts a non-negative count of seconds or an HTTP-date: IMF-fixdate, or
/// one of the obsolete RFC 850 and asctime forms. A date in the past yields
/// zero. Anything else yields `None`, leaving the caller to fall
/// back to exponential backoff.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use scoutdash_lib::retry::parse_delay;
///
/// assert_eq!(parse_delay(Some("120")), Some(Duration::from_secs(120)));
/// assert_eq!(parse_delay(Some("soon")), None);
/// assert_eq!(parse_delay(None), None);
/// ```
pub fn parse_delay(raw: Option<&str>) -> Option<Duration> {
    parse_delay_at(raw, Utc::now())
}

/// Like [`parse_delay`], measuring HTTP-dates against `now`.
pub fn parse_delay_at(raw: Option<&str>, now: DateTime<Utc>) -> Option<Duration> {
    let raw = raw?.trim();

    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = parse_http_date(raw)?;
    Some(at.signed_duration_since(now).to_std().unwrap_or(Duration::ZERO))
}

fn parse_http_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc2822(raw) {
        return Some(at.with_timezone(&Utc));
    }
    OBSOLETE_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use chrono::TimeZone;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 10, 21, 7, 27, 30).unwrap()
    }

    #[test]
    fn test_absent() {
        assert_eq!(parse_delay_at(None, now()), None);
    }

    #[test]
    fn test_seconds() {
        assert_eq!(
            parse_delay_at(Some("120"), now()),
            Some(Duration::from_millis(120_000))
        );
        assert_eq!(parse_delay_at(Some("0"), now()), Some(Duration::ZERO));
        assert_eq!(
            parse_delay_at(Some(" 7 "), now()),
            Some(Duration::from_secs(7))
        );
    }

    #[test]
    fn test_http_date_future() {
        assert_eq!(
            parse_delay_at(Some("Wed, 21 Oct 2015 07:28:00 GMT"), now()),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_http_date_past_clamps_to_zero() {
        assert_eq!(
            parse_delay_at(Some("Wed, 21 Oct 2015 07:27:00 GMT"), now()),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_obsolete_http_dates() {
        assert_eq!(
            parse_delay_at(Some("Wednesday, 21-Oct-15 07:28:00 GMT"), now()),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            parse_delay_at(Some("Wed Oct 21 07:28:00 2015"), now()),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            parse_delay_at(Some("Thu Oct  1 07:28:00 2015"), now()),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_http_date_against_wall_clock() {
        let in_30s = (Utc::now() + TimeDelta::seconds(30)).to_rfc2822();
        let delay = parse_delay(Some(&in_30s)).unwrap();
        assert!(delay <= Duration::from_secs(30));
        assert!(delay >= Duration::from_secs(28));

        let ago_30s = (Utc::now() - TimeDelta::seconds(30)).to_rfc2822();
        assert_eq!(parse_delay(Some(&ago_30s)), Some(Duration::ZERO));
    }

    #[test]
    fn test_garbage() {
        assert_eq!(parse_delay_at(Some("soon"), now()), None);
        assert_eq!(parse_delay_at(Some("-5"), now()), None);
        assert_eq!(parse_delay_at(Some("1.5"), now()), None);
        assert_eq!(parse_delay_at(Some(""), now()), None);
    }
}
