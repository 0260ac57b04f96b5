use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

pub const MS_PER_MINUTE: i64 = 60 * 1000;
pub const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;
pub const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

pub fn format_ms_rfc3339(epoch_ms: i64) -> String {
    let fallback = OffsetDateTime::from_unix_timestamp(0).unwrap_or(OffsetDateTime::UNIX_EPOCH);
    let value =
        OffsetDateTime::from_unix_timestamp_nanos(epoch_ms as i128 * 1_000_000).unwrap_or(fallback);
    value
        .format(&Rfc3339)
        .unwrap_or("1970-01-01T00:00:00Z".to_string())
}

/// Start of the calendar day containing `epoch_ms`, where days roll over at
/// midnight in the zone `utc_offset_minutes` east of UTC.
pub fn day_start_ms(epoch_ms: i64, utc_offset_minutes: i32) -> i64 {
    let offset_ms = i64::from(utc_offset_minutes) * MS_PER_MINUTE;
    let local = epoch_ms + offset_ms;
    local - local.rem_euclid(MS_PER_DAY) - offset_ms
}
