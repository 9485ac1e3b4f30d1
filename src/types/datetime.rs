//! Calendar math and text formats for the temporal types.
//!
//! PostgreSQL stores dates as days since 2000-01-01 and times/timestamps
//! as microseconds (since midnight / since 2000-01-01 00:00:00). The
//! civil-date conversions below use the standard proleptic-Gregorian
//! algorithms so no calendar dependency is needed for the wire formats.

use crate::error::{Error, Result};

/// Days from the Unix epoch (1970-01-01) to the PostgreSQL epoch (2000-01-01).
pub const PG_EPOCH_UNIX_DAYS: i64 = 10_957;

/// Microseconds from the Unix epoch to the PostgreSQL epoch.
pub const PG_EPOCH_UNIX_MICROS: i64 = PG_EPOCH_UNIX_DAYS * 86_400 * 1_000_000;

pub const MICROS_PER_SECOND: i64 = 1_000_000;
pub const MICROS_PER_MINUTE: i64 = 60 * MICROS_PER_SECOND;
pub const MICROS_PER_HOUR: i64 = 60 * MICROS_PER_MINUTE;
pub const MICROS_PER_DAY: i64 = 24 * MICROS_PER_HOUR;

/// Convert (year, month, day) to days since the PostgreSQL epoch.
///
/// Proleptic Gregorian; `year` may be zero or negative (astronomical
/// numbering, so 1 BC is year 0).
pub fn ymd_to_days(year: i32, month: u32, day: u32) -> Result<i32> {
    if !(1..=12).contains(&month) {
        return Err(Error::Decode(format!("invalid month: {}", month)));
    }
    if !(1..=31).contains(&day) || day > days_in_month(year, month) {
        return Err(Error::Decode(format!("invalid day: {}", day)));
    }

    // days_from_civil (Howard Hinnant), yielding days since 1970-01-01
    let y = i64::from(year) - i64::from(month <= 2);
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = (month as i64 + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    let unix_days = era * 146_097 + doe - 719_468;

    let pg_days = unix_days - PG_EPOCH_UNIX_DAYS;
    i32::try_from(pg_days).map_err(|_| Error::Decode("date out of range".into()))
}

/// Convert days since the PostgreSQL epoch to (year, month, day).
pub fn days_to_ymd(days: i32) -> (i32, u32, u32) {
    // civil_from_days (Howard Hinnant)
    let z = i64::from(days) + PG_EPOCH_UNIX_DAYS + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let year = (y + i64::from(m <= 2)) as i32;
    (year, m, d)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if is_leap_year(year) {
                29
            } else {
                28
            }
        }
        _ => 0,
    }
}

fn is_leap_year(year: i32) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

/// Render a date ("YYYY-MM-DD", with a " BC" suffix for non-positive years).
pub fn format_date(days: i32) -> String {
    let (year, month, day) = days_to_ymd(days);
    if year > 0 {
        format!("{:04}-{:02}-{:02}", year, month, day)
    } else {
        // Astronomical year 0 is 1 BC
        format!("{:04}-{:02}-{:02} BC", 1 - year, month, day)
    }
}

/// Parse a date ("YYYY-MM-DD", optional " BC" suffix).
pub fn parse_date(s: &str) -> Result<i32> {
    let (body, bc) = match s.strip_suffix(" BC") {
        Some(body) => (body, true),
        None => (s, false),
    };

    let mut parts = body.splitn(3, '-');
    let year: i32 = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| Error::Decode(format!("invalid date: {:?}", s)))?;
    let month: u32 = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| Error::Decode(format!("invalid date: {:?}", s)))?;
    let day: u32 = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| Error::Decode(format!("invalid date: {:?}", s)))?;

    let year = if bc { 1 - year } else { year };
    ymd_to_days(year, month, day)
}

/// Render a time of day ("HH:MM:SS" with up to six fractional digits,
/// trailing zeros trimmed).
pub fn format_time(micros: i64) -> String {
    let hours = micros / MICROS_PER_HOUR;
    let minutes = (micros % MICROS_PER_HOUR) / MICROS_PER_MINUTE;
    let seconds = (micros % MICROS_PER_MINUTE) / MICROS_PER_SECOND;
    let frac = micros % MICROS_PER_SECOND;

    if frac == 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        let frac = format!("{:06}", frac);
        let frac = frac.trim_end_matches('0');
        format!("{:02}:{:02}:{:02}.{}", hours, minutes, seconds, frac)
    }
}

/// Parse a time of day ("HH:MM:SS[.ffffff]").
pub fn parse_time(s: &str) -> Result<i64> {
    let (hms, frac) = match s.split_once('.') {
        Some((hms, frac)) => (hms, Some(frac)),
        None => (s, None),
    };

    let mut parts = hms.splitn(3, ':');
    let hours: i64 = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| Error::Decode(format!("invalid time: {:?}", s)))?;
    let minutes: i64 = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| Error::Decode(format!("invalid time: {:?}", s)))?;
    let seconds: i64 = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| Error::Decode(format!("invalid time: {:?}", s)))?;

    if !(0..24).contains(&hours) && !(hours == 24 && minutes == 0 && seconds == 0) {
        return Err(Error::Decode(format!("invalid time: {:?}", s)));
    }
    if !(0..60).contains(&minutes) || !(0..61).contains(&seconds) {
        return Err(Error::Decode(format!("invalid time: {:?}", s)));
    }

    let mut micros =
        hours * MICROS_PER_HOUR + minutes * MICROS_PER_MINUTE + seconds * MICROS_PER_SECOND;

    if let Some(frac) = frac {
        if frac.is_empty() || frac.len() > 6 || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::Decode(format!("invalid time: {:?}", s)));
        }
        let mut value: i64 = frac
            .parse()
            .map_err(|_| Error::Decode(format!("invalid time: {:?}", s)))?;
        for _ in frac.len()..6 {
            value *= 10;
        }
        micros += value;
    }

    Ok(micros)
}

/// Render a timestamp ("YYYY-MM-DD HH:MM:SS[.ffffff]").
pub fn format_timestamp(micros: i64) -> String {
    let (days, time) = split_timestamp(micros);
    format!("{} {}", format_date(days), format_time(time))
}

/// Render a timestamptz in UTC ("YYYY-MM-DD HH:MM:SS[.ffffff]+00").
pub fn format_timestamptz(micros: i64) -> String {
    let (days, time) = split_timestamp(micros);
    format!("{} {}+00", format_date(days), format_time(time))
}

fn split_timestamp(micros: i64) -> (i32, i64) {
    let mut days = micros.div_euclid(MICROS_PER_DAY);
    let mut time = micros.rem_euclid(MICROS_PER_DAY);
    if time < 0 {
        time += MICROS_PER_DAY;
        days -= 1;
    }
    (days as i32, time)
}

/// Parse a timestamp ("YYYY-MM-DD HH:MM:SS[.ffffff]", optional " BC").
pub fn parse_timestamp(s: &str) -> Result<i64> {
    let (body, bc) = match s.strip_suffix(" BC") {
        Some(body) => (body, true),
        None => (s, false),
    };

    let (date_part, time_part) = body
        .split_once(' ')
        .ok_or_else(|| Error::Decode(format!("invalid timestamp: {:?}", s)))?;

    let date_part = if bc {
        format!("{} BC", date_part)
    } else {
        date_part.to_string()
    };

    let days = parse_date(&date_part)?;
    let time = parse_time(time_part)?;
    Ok(i64::from(days) * MICROS_PER_DAY + time)
}

/// Parse a timestamptz with a UTC offset suffix ("…+HH", "…+HH:MM",
/// "…-HH:MM:SS"); the result is normalized to UTC microseconds.
pub fn parse_timestamptz(s: &str) -> Result<i64> {
    // Find the sign that starts the offset: after the date's dashes, so
    // search only past the last space.
    let time_start = s
        .rfind(' ')
        .ok_or_else(|| Error::Decode(format!("invalid timestamptz: {:?}", s)))?;
    let tail = &s[time_start..];

    let offset_pos = tail
        .rfind(['+', '-'])
        .ok_or_else(|| Error::Decode(format!("invalid timestamptz: {:?}", s)))?;
    let split = time_start + offset_pos;

    let (body, offset) = s.split_at(split);
    let micros = parse_timestamp(body)?;

    let negative = offset.starts_with('-');
    let mut fields = offset[1..].splitn(3, ':');
    let hours: i64 = fields
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| Error::Decode(format!("invalid timestamptz offset: {:?}", offset)))?;
    let minutes: i64 = match fields.next() {
        Some(p) => p
            .parse()
            .map_err(|_| Error::Decode(format!("invalid timestamptz offset: {:?}", offset)))?,
        None => 0,
    };
    let seconds: i64 = match fields.next() {
        Some(p) => p
            .parse()
            .map_err(|_| Error::Decode(format!("invalid timestamptz offset: {:?}", offset)))?,
        None => 0,
    };

    let mut offset_micros =
        hours * MICROS_PER_HOUR + minutes * MICROS_PER_MINUTE + seconds * MICROS_PER_SECOND;
    if negative {
        offset_micros = -offset_micros;
    }

    Ok(micros - offset_micros)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_is_day_zero() {
        assert_eq!(ymd_to_days(2000, 1, 1).unwrap(), 0);
        assert_eq!(days_to_ymd(0), (2000, 1, 1));
    }

    #[test]
    fn known_dates() {
        assert_eq!(ymd_to_days(2000, 1, 2).unwrap(), 1);
        assert_eq!(ymd_to_days(1999, 12, 31).unwrap(), -1);
        assert_eq!(ymd_to_days(1970, 1, 1).unwrap(), -10_957);
        assert_eq!(ymd_to_days(2004, 2, 29).unwrap(), 1520);
        assert_eq!(days_to_ymd(1520), (2004, 2, 29));
    }

    #[test]
    fn round_trip_sweep() {
        for days in (-80_000..80_000).step_by(997) {
            let (y, m, d) = days_to_ymd(days);
            assert_eq!(ymd_to_days(y, m, d).unwrap(), days, "days={days}");
        }
    }

    #[test]
    fn rejects_invalid_dates() {
        assert!(ymd_to_days(2001, 2, 29).is_err());
        assert!(ymd_to_days(2000, 13, 1).is_err());
        assert!(ymd_to_days(2000, 0, 1).is_err());
        assert!(ymd_to_days(2000, 4, 31).is_err());
    }

    #[test]
    fn date_text_round_trip() {
        assert_eq!(format_date(0), "2000-01-01");
        assert_eq!(parse_date("2000-01-01").unwrap(), 0);
        assert_eq!(parse_date(&format_date(8765)).unwrap(), 8765);
    }

    #[test]
    fn bc_dates() {
        let days = ymd_to_days(0, 3, 15).unwrap(); // 1 BC
        assert!(format_date(days).ends_with(" BC"));
        assert_eq!(parse_date(&format_date(days)).unwrap(), days);
    }

    #[test]
    fn time_text_round_trip() {
        assert_eq!(format_time(0), "00:00:00");
        assert_eq!(parse_time("00:00:00").unwrap(), 0);

        let noon_ish = 12 * MICROS_PER_HOUR + 34 * MICROS_PER_MINUTE + 56 * MICROS_PER_SECOND + 789_000;
        assert_eq!(format_time(noon_ish), "12:34:56.789");
        assert_eq!(parse_time("12:34:56.789").unwrap(), noon_ish);
        assert_eq!(parse_time("12:34:56.789000").unwrap(), noon_ish);
    }

    #[test]
    fn timestamp_text_round_trip() {
        let micros = 86_400 * MICROS_PER_SECOND + 90_061_000_000; // 2000-01-02 25:01:01 → wraps
        let rendered = format_timestamp(micros);
        assert_eq!(parse_timestamp(&rendered).unwrap(), micros);

        assert_eq!(format_timestamp(0), "2000-01-01 00:00:00");
        assert_eq!(parse_timestamp("2000-01-01 00:00:00").unwrap(), 0);
    }

    #[test]
    fn negative_timestamp_wraps_midnight() {
        // One microsecond before the epoch
        let rendered = format_timestamp(-1);
        assert_eq!(rendered, "1999-12-31 23:59:59.999999");
        assert_eq!(parse_timestamp(&rendered).unwrap(), -1);
    }

    #[test]
    fn timestamptz_offsets() {
        assert_eq!(parse_timestamptz("2000-01-01 00:00:00+00").unwrap(), 0);
        assert_eq!(
            parse_timestamptz("2000-01-01 02:00:00+02").unwrap(),
            0
        );
        assert_eq!(
            parse_timestamptz("1999-12-31 19:00:00-05:00").unwrap(),
            0
        );
        assert_eq!(format_timestamptz(0), "2000-01-01 00:00:00+00");
    }
}
