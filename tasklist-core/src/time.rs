//! Time utilities: timezone-aware due dates.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Format accepted for local due dates.
pub const LOCAL_DUE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Parse a due date like "2026-02-20 23:59" in an IANA tz like "Europe/Madrid",
/// returning UTC.
pub fn parse_local_due_to_utc(local: &str, tz: &str) -> Result<DateTime<Utc>> {
    let tz: Tz = tz
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid timezone: {tz}"))?;

    let ndt = NaiveDateTime::parse_from_str(local, LOCAL_DUE_FORMAT)
        .map_err(|e| anyhow::anyhow!("invalid local datetime '{local}': {e}"))?;

    let local_dt = tz
        .from_local_datetime(&ndt)
        .single()
        .ok_or_else(|| anyhow::anyhow!("ambiguous or invalid local time (DST?): {local} {tz}"))?;

    Ok(local_dt.with_timezone(&Utc))
}

/// Accept RFC3339, "YYYY-MM-DD HH:MM" (local) or a bare date (local end of day).
pub fn parse_due(input: &str, tz: &str) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }
    if NaiveDate::parse_from_str(input, "%Y-%m-%d").is_ok() {
        return parse_local_due_to_utc(&format!("{input} 23:59"), tz);
    }
    parse_local_due_to_utc(input, tz)
}

/// Render a UTC instant in the user's timezone.
pub fn format_local(dt: DateTime<Utc>, tz: &str) -> String {
    match tz.parse::<Tz>() {
        Ok(tz) => dt.with_timezone(&tz).format(LOCAL_DUE_FORMAT).to_string(),
        Err(_) => dt.format("%Y-%m-%d %H:%M UTC").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_madrid_due() {
        // Feb is CET (UTC+1)
        let utc = parse_local_due_to_utc("2026-02-20 23:59", "Europe/Madrid").unwrap();
        assert_eq!(utc.to_rfc3339(), "2026-02-20T22:59:00+00:00");
    }

    #[test]
    fn test_parse_due_variants() {
        let rfc = parse_due("2026-02-20T10:00:00Z", "Europe/Madrid").unwrap();
        assert_eq!(rfc.to_rfc3339(), "2026-02-20T10:00:00+00:00");

        let day = parse_due("2026-02-20", "UTC").unwrap();
        assert_eq!(day.to_rfc3339(), "2026-02-20T23:59:00+00:00");

        assert!(parse_due("tomorrow", "UTC").is_err());
        assert!(parse_due("2026-02-20 10:00", "Mars/Olympus").is_err());
    }

    #[test]
    fn test_format_local() {
        let utc = parse_local_due_to_utc("2026-07-01 09:30", "Europe/Madrid").unwrap();
        assert_eq!(format_local(utc, "Europe/Madrid"), "2026-07-01 09:30");
    }
}
