use time::OffsetDateTime;

/// Current wall-clock time in UTC.
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// Current wall-clock time as milliseconds since the Unix epoch.
pub fn now_unix_millis() -> i64 {
    (now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_millis_tracks_seconds() {
        let secs = now_utc().unix_timestamp();
        let millis = now_unix_millis();
        assert!((millis / 1000 - secs).abs() <= 1);
    }
}
