//! Turns crawler capture metadata into a replay link and a harvest time.

use crate::{CaptureMetadata, MetadataError};
use chrono::{DateTime, NaiveDateTime, Utc};

const SECONDS_LEN: usize = 14;
const MILLIS_LEN: usize = 17;

/// Replay location and time of a successful capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivalInfo {
    pub archival_url: String,
    pub harvested_at: DateTime<Utc>,
}

/// Build the archival URL and harvest time for a capture.
///
/// The archival URL is `archive_base + timestamp + "/" + captured_url`. The
/// captured URL is appended exactly as the crawler recorded it; the replay
/// system looks captures up by that exact string, so it is never escaped.
pub fn to_archival_info(
    metadata: &CaptureMetadata,
    archive_base: &str,
) -> Result<ArchivalInfo, MetadataError> {
    let timestamp = metadata.timestamp.as_str();
    if timestamp.len() != SECONDS_LEN && timestamp.len() != MILLIS_LEN {
        return Err(MetadataError::InvalidTimestampLength(timestamp.len()));
    }

    let harvested_at = parse_timestamp(timestamp)?;
    let archival_url = format!("{archive_base}{timestamp}/{}", metadata.captured_url);

    Ok(ArchivalInfo {
        archival_url,
        harvested_at,
    })
}

/// `YYYYMMDDhhmmss` or `YYYYMMDDhhmmssfff`, in UTC.
pub fn parse_timestamp(timestamp: &str) -> Result<DateTime<Utc>, MetadataError> {
    let invalid = || MetadataError::InvalidTimestamp(timestamp.to_string());

    // chrono accepts signs and such in numeric fields; the format is digits only.
    if !timestamp.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let naive = match timestamp.len() {
        SECONDS_LEN => NaiveDateTime::parse_from_str(timestamp, "%Y%m%d%H%M%S"),
        MILLIS_LEN => {
            let (seconds, millis) = timestamp.split_at(SECONDS_LEN);
            NaiveDateTime::parse_from_str(&format!("{seconds}.{millis}"), "%Y%m%d%H%M%S%.f")
        }
        other => return Err(MetadataError::InvalidTimestampLength(other)),
    }
    .map_err(|_| invalid())?;

    Ok(naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    const BASE: &str = "https://archive.test/wayback/";

    fn metadata(timestamp: &str, url: &str) -> CaptureMetadata {
        CaptureMetadata {
            timestamp: timestamp.to_string(),
            captured_url: url.to_string(),
        }
    }

    #[test]
    fn test_seconds_precision() {
        let info = to_archival_info(&metadata("20240101120000", "http://example.com"), BASE).unwrap();
        assert_eq!(info.harvested_at, Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());
        assert_eq!(
            info.archival_url,
            "https://archive.test/wayback/20240101120000/http://example.com"
        );
    }

    #[test]
    fn test_millisecond_precision() {
        let info = to_archival_info(&metadata("20240229235959123", "https://example.com/"), BASE).unwrap();
        assert_eq!(info.harvested_at.second(), 59);
        assert_eq!(info.harvested_at.nanosecond(), 123_000_000);
        assert_eq!(
            info.archival_url,
            "https://archive.test/wayback/20240229235959123/https://example.com/"
        );
    }

    #[test]
    fn test_captured_url_is_not_escaped() {
        let raw = "http://example.com/a b?q=č&x=%20";
        let info = to_archival_info(&metadata("20240101120000", raw), BASE).unwrap();
        assert!(info.archival_url.ends_with(raw));
    }

    #[test]
    fn test_wrong_length_rejected() {
        for ts in ["", "2024", "202401011200001", "2024010112000012345"] {
            assert_eq!(
                to_archival_info(&metadata(ts, "http://example.com"), BASE),
                Err(MetadataError::InvalidTimestampLength(ts.len()))
            );
        }
    }

    #[test]
    fn test_non_digit_or_impossible_dates_rejected() {
        for ts in ["2024010112000x", "+2024010112000", "20241301120000", "20240230120000", "20240101250000"] {
            assert!(
                matches!(
                    to_archival_info(&metadata(ts, "http://example.com"), BASE),
                    Err(MetadataError::InvalidTimestamp(_))
                ),
                "{ts}"
            );
        }
    }
}
