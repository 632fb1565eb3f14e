// crates/herbtrace-core/src/identity.rs
//
// Batch identity derivation. The composite id is the only identity a batch
// has, so two events with the same (species, collector, UTC day) resolve to
// the same batch without any lookup table.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::error::{Result, TraceError};

pub const BATCH_ID_PREFIX: &str = "B";
const FALLBACK_CODE_LEN: usize = 5;

/// Derives a deterministic short code for a species that has not been
/// seeded: first whitespace-delimited token of the scientific name,
/// truncated to five characters, upper-cased. Pure; the same name always
/// yields the same code.
pub fn fallback_species_code(scientific_name: &str) -> String {
    scientific_name
        .split_whitespace()
        .next()
        .unwrap_or("")
        .chars()
        .take(FALLBACK_CODE_LEN)
        .collect::<String>()
        .to_uppercase()
}

/// The species-code segment sits between two `-` delimiters, so a code
/// containing the delimiter would corrupt id parsing. Restricted to ASCII
/// alphanumerics.
pub fn validate_species_code(code: &str) -> Result<()> {
    if code.is_empty() {
        return Err(TraceError::validation("species code must not be empty"));
    }
    if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(TraceError::validation(format!(
            "species code '{code}' must contain only ASCII alphanumerics"
        )));
    }
    Ok(())
}

/// The collector id is the final id segment, so embedded `-` is unambiguous
/// and legal (`farmer-123`). It only has to be non-empty.
pub fn validate_collector_id(collector_id: &str) -> Result<()> {
    if collector_id.trim().is_empty() {
        return Err(TraceError::validation("collector id must not be empty"));
    }
    Ok(())
}

/// Parses an event timestamp. RFC 3339 offsets are honored and converted to
/// UTC; a timestamp without an offset is treated as already-UTC.
pub fn parse_utc_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }

    Err(TraceError::validation(format!(
        "timestamp '{raw}' is not RFC 3339 or naive ISO 8601"
    )))
}

/// Parses the lower bound of a date-range filter: a full timestamp, or a
/// bare `YYYY-MM-DD` expanded to the start of that UTC day.
pub fn parse_range_start(raw: &str) -> Result<DateTime<Utc>> {
    match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(date) => Ok(date.and_time(NaiveTime::MIN).and_utc()),
        Err(_) => parse_utc_timestamp(raw),
    }
}

/// Upper-bound counterpart: a bare date covers its whole UTC day, so it
/// expands to the last microsecond before the next midnight (the filters
/// are inclusive).
pub fn parse_range_end(raw: &str) -> Result<DateTime<Utc>> {
    match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(date) => {
            let next = date
                .succ_opt()
                .ok_or_else(|| TraceError::validation(format!("date '{raw}' out of range")))?;
            Ok(next.and_time(NaiveTime::MIN).and_utc() - Duration::microseconds(1))
        }
        Err(_) => parse_utc_timestamp(raw),
    }
}

/// UTC calendar date of the timestamp, `YYYY-MM-DD`.
pub fn batch_date(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d").to_string()
}

/// Composes `B-<code>-<YYYYMMDD>-<collectorId>`, validating the segments
/// that could corrupt the delimiter structure.
pub fn compose_batch_id(
    species_code: &str,
    collector_id: &str,
    timestamp: DateTime<Utc>,
) -> Result<String> {
    validate_species_code(species_code)?;
    validate_collector_id(collector_id)?;
    Ok(format!(
        "{BATCH_ID_PREFIX}-{}-{}-{}",
        species_code,
        timestamp.format("%Y%m%d"),
        collector_id
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_code_truncates_first_token() {
        assert_eq!(fallback_species_code("Withania somnifera"), "WITHA");
        assert_eq!(fallback_species_code("Ocimum tenuiflorum"), "OCIMU");
        assert_eq!(fallback_species_code("Rauvolfia serpentina"), "RAUVO");
        assert_eq!(fallback_species_code("Aloe vera"), "ALOE");
    }

    #[test]
    fn fallback_code_is_deterministic() {
        let a = fallback_species_code("Withania somnifera");
        let b = fallback_species_code("Withania somnifera");
        assert_eq!(a, b);
    }

    #[test]
    fn batch_id_matches_expected_shape() {
        let ts = parse_utc_timestamp("2025-09-16T09:00:00Z").unwrap();
        let id = compose_batch_id("WITHA", "farmer-123", ts).unwrap();
        assert_eq!(id, "B-WITHA-20250916-farmer-123");
    }

    #[test]
    fn same_utc_day_resolves_to_same_id() {
        let morning = parse_utc_timestamp("2025-09-16T00:01:00Z").unwrap();
        let evening = parse_utc_timestamp("2025-09-16T23:59:59Z").unwrap();
        assert_eq!(
            compose_batch_id("WITHA", "farmer-123", morning).unwrap(),
            compose_batch_id("WITHA", "farmer-123", evening).unwrap()
        );
    }

    #[test]
    fn offset_timestamps_collapse_to_utc_day() {
        // 01:30+05:30 is 20:00 UTC the previous day.
        let ts = parse_utc_timestamp("2025-09-17T01:30:00+05:30").unwrap();
        assert_eq!(batch_date(ts), "2025-09-16");
    }

    #[test]
    fn naive_timestamp_treated_as_utc() {
        let naive = parse_utc_timestamp("2025-09-16T09:00:00").unwrap();
        let explicit = parse_utc_timestamp("2025-09-16T09:00:00Z").unwrap();
        assert_eq!(naive, explicit);
    }

    #[test]
    fn species_code_with_delimiter_is_rejected() {
        let ts = parse_utc_timestamp("2025-09-16T09:00:00Z").unwrap();
        assert!(compose_batch_id("WI-THA", "farmer-123", ts).is_err());
        assert!(compose_batch_id("", "farmer-123", ts).is_err());
    }

    #[test]
    fn empty_collector_is_rejected() {
        let ts = parse_utc_timestamp("2025-09-16T09:00:00Z").unwrap();
        assert!(compose_batch_id("WITHA", "  ", ts).is_err());
    }

    #[test]
    fn bare_dates_expand_to_day_bounds() {
        let start = parse_range_start("2025-09-16").unwrap();
        let end = parse_range_end("2025-09-16").unwrap();
        assert_eq!(start, parse_utc_timestamp("2025-09-16T00:00:00Z").unwrap());
        assert!(end >= parse_utc_timestamp("2025-09-16T23:59:59Z").unwrap());
        assert!(end < parse_utc_timestamp("2025-09-17T00:00:00Z").unwrap());
    }

    #[test]
    fn full_timestamps_pass_through_range_bounds() {
        let explicit = parse_utc_timestamp("2025-09-16T09:00:00Z").unwrap();
        assert_eq!(parse_range_start("2025-09-16T09:00:00Z").unwrap(), explicit);
        assert_eq!(parse_range_end("2025-09-16T09:00:00Z").unwrap(), explicit);
        assert!(parse_range_start("16/09/2025").is_err());
        assert!(parse_range_end("16/09/2025").is_err());
    }

    #[test]
    fn garbage_timestamp_is_a_validation_error() {
        assert!(parse_utc_timestamp("yesterday").is_err());
    }
}
