use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use norn_core::utils::logger::init_logger;

/// Initialize logging from the CLI arguments
pub fn init_logging(log_level: &str, json_logs: bool) {
    init_logger(log_level, json_logs);
}

/// Parse a `YYYY-MM-DD` date into the UTC midnight opening that day
pub fn parse_date(value: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("invalid date {value:?}, expected YYYY-MM-DD"))?;
    Ok(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap()))
}

/// Microseconds since epoch for a parsed date boundary
pub fn date_to_micros(value: &str) -> Result<u64> {
    Ok(parse_date(value)?.timestamp_micros() as u64)
}
