//! Catalog record model and positional field decoding.
//!
//! Every record in the film list is an array of strings whose meaning is
//! given by position. [`FIELD_TABLE`] maps each position to the setter that
//! applies it to a [`CatalogRecord`].

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};

/// Maximum length, in characters, of show names and titles.
pub const MAX_NAME_CHARS: usize = 255;

/// Air date used when a record carries none.
pub fn default_aired() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1980, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// One decoded entry of the film list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRecord {
    pub channel: String,
    pub show: String,
    pub title: String,
    /// Local air date and time, `1980-01-01 00:00:00` when unknown.
    pub aired: NaiveDateTime,
    /// Duration in seconds.
    pub duration: Option<u32>,
    pub size: u64,
    pub description: String,
    pub website: String,
    pub url_sub: String,
    pub url_video: String,
    pub url_video_sd: String,
    pub url_video_hd: String,
    pub aired_epoch: i64,
    pub geo: String,
}

impl Default for CatalogRecord {
    fn default() -> Self {
        Self {
            channel: String::new(),
            show: String::new(),
            title: String::new(),
            aired: default_aired(),
            duration: None,
            size: 0,
            description: String::new(),
            website: String::new(),
            url_sub: String::new(),
            url_video: String::new(),
            url_video_sd: String::new(),
            url_video_hd: String::new(),
            aired_epoch: 0,
            geo: String::new(),
        }
    }
}

/// Applies one raw value to a record.
pub type FieldSetter = fn(&mut CatalogRecord, &str);

/// Position to setter table. `None` marks reserved positions.
///
/// Position 11 and the odd positions 13, 15 and 17 carry legacy RTMP and
/// token URLs that nothing consumes.
pub static FIELD_TABLE: [Option<FieldSetter>; 19] = [
    Some(set_channel),      // 0
    Some(set_show),         // 1
    Some(set_title),        // 2
    Some(set_aired_date),   // 3
    Some(set_aired_time),   // 4
    Some(set_duration),     // 5
    Some(set_size),         // 6
    Some(set_description),  // 7
    Some(set_url_video),    // 8
    Some(set_website),      // 9
    Some(set_url_sub),      // 10
    None,                   // 11
    Some(set_url_video_sd), // 12
    None,                   // 13
    Some(set_url_video_hd), // 14
    None,                   // 15
    Some(set_aired_epoch),  // 16
    None,                   // 17
    Some(set_geo),          // 18
];

impl CatalogRecord {
    /// Applies `value` to the field at `position`. Unknown and reserved
    /// positions are ignored.
    pub fn apply(&mut self, position: usize, value: &str) {
        if let Some(Some(setter)) = FIELD_TABLE.get(position) {
            setter(self, value);
        }
    }
}

fn truncate_chars(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

/// Expands a `"<N>|<suffix>"` value against `base`.
///
/// The first `N` characters of `base` are followed by `suffix`. Values of
/// any other form are returned unchanged.
pub fn expand_delta_url(base: &str, value: &str) -> String {
    let mut parts = value.split('|');
    if let (Some(count), Some(suffix), None) = (parts.next(), parts.next(), parts.next()) {
        if let Ok(count) = count.parse::<usize>() {
            let mut url = truncate_chars(base, count);
            url.push_str(suffix);
            return url;
        }
    }
    value.to_string()
}

/// Parses `hh:mm:ss` into seconds. `00:00:00` counts as no duration.
pub fn parse_duration(value: &str) -> Option<u32> {
    let time = NaiveTime::parse_from_str(value, "%H:%M:%S").ok()?;
    let seconds = time.num_seconds_from_midnight();
    (seconds > 0).then_some(seconds)
}

fn set_channel(record: &mut CatalogRecord, value: &str) {
    if !value.is_empty() {
        record.channel = value.to_string();
    }
}

fn set_show(record: &mut CatalogRecord, value: &str) {
    if !value.is_empty() {
        record.show = truncate_chars(value, MAX_NAME_CHARS);
    }
}

fn set_title(record: &mut CatalogRecord, value: &str) {
    record.title = truncate_chars(value, MAX_NAME_CHARS);
}

fn set_aired_date(record: &mut CatalogRecord, value: &str) {
    if value.chars().count() != 10 {
        return;
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%d.%m.%Y") {
        record.aired = date.and_time(NaiveTime::default());
    }
}

fn set_aired_time(record: &mut CatalogRecord, value: &str) {
    if record.aired == default_aired() || value.chars().count() != 8 {
        return;
    }
    if let Ok(time) = NaiveTime::parse_from_str(value, "%H:%M:%S") {
        record.aired = record.aired.date().and_time(time);
    }
}

fn set_duration(record: &mut CatalogRecord, value: &str) {
    if value.len() == 8 {
        record.duration = parse_duration(value);
    }
}

fn set_size(record: &mut CatalogRecord, value: &str) {
    if let Ok(size) = value.parse() {
        record.size = size;
    }
}

fn set_description(record: &mut CatalogRecord, value: &str) {
    record.description = value.to_string();
}

fn set_url_video(record: &mut CatalogRecord, value: &str) {
    record.url_video = value.to_string();
}

fn set_website(record: &mut CatalogRecord, value: &str) {
    record.website = value.to_string();
}

fn set_url_sub(record: &mut CatalogRecord, value: &str) {
    record.url_sub = value.to_string();
}

fn set_url_video_sd(record: &mut CatalogRecord, value: &str) {
    record.url_video_sd = expand_delta_url(&record.url_video, value);
}

fn set_url_video_hd(record: &mut CatalogRecord, value: &str) {
    record.url_video_hd = expand_delta_url(&record.url_video, value);
}

fn set_aired_epoch(record: &mut CatalogRecord, value: &str) {
    if let Ok(epoch) = value.parse() {
        record.aired_epoch = epoch;
    }
}

fn set_geo(record: &mut CatalogRecord, value: &str) {
    record.geo = value.to_string();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_url_expansion() {
        let base = "http://example.com/video.mp4";
        assert_eq!(expand_delta_url(base, "7|suffix.mp4"), "http://suffix.mp4");
        assert_eq!(
            expand_delta_url(base, "http://other.com/x.mp4"),
            "http://other.com/x.mp4"
        );
        // prefix longer than the base takes all of it
        assert_eq!(expand_delta_url("http://a", "50|/b"), "http://a/b");
        assert_eq!(expand_delta_url(base, "x|y"), "x|y");
        assert_eq!(expand_delta_url(base, "-1|y"), "-1|y");
        assert_eq!(expand_delta_url(base, "1|2|3"), "1|2|3");
    }

    #[test]
    fn test_delta_url_uses_current_video_url() {
        let mut record = CatalogRecord::default();
        record.apply(8, "https://cdn.example/show/ep1_hq.mp4");
        record.apply(12, "25|ep1_lq.mp4");
        record.apply(14, "25|ep1_hd.mp4");
        assert_eq!(record.url_video_sd, "https://cdn.example/show/ep1_lq.mp4");
        assert_eq!(record.url_video_hd, "https://cdn.example/show/ep1_hd.mp4");
    }

    #[test]
    fn test_date_and_time_transform() {
        let mut record = CatalogRecord::default();
        record.apply(3, "01.02.2020");
        assert_eq!(record.aired.to_string(), "2020-02-01 00:00:00");
        record.apply(4, "03:04:05");
        assert_eq!(record.aired.to_string(), "2020-02-01 03:04:05");
    }

    #[test]
    fn test_time_ignored_while_date_is_default() {
        let mut record = CatalogRecord::default();
        record.apply(4, "03:04:05");
        assert_eq!(record.aired, default_aired());
        assert_eq!(record.aired.to_string(), "1980-01-01 00:00:00");
    }

    #[test]
    fn test_malformed_dates_leave_default() {
        let mut record = CatalogRecord::default();
        record.apply(3, "2020-02-01");
        assert_eq!(record.aired, default_aired());
        record.apply(3, "1.2.2020");
        assert_eq!(record.aired, default_aired());
    }

    #[test]
    fn test_show_and_title_truncated() {
        let mut record = CatalogRecord::default();
        let long: String = "ä".repeat(300);
        record.apply(1, &long);
        record.apply(2, &long);
        assert_eq!(record.show.chars().count(), 255);
        assert_eq!(record.title.chars().count(), 255);
    }

    #[test]
    fn test_empty_channel_and_show_do_not_overwrite() {
        let mut record = CatalogRecord::default();
        record.apply(0, "ARD");
        record.apply(0, "");
        record.apply(1, "Tagesschau");
        record.apply(1, "");
        assert_eq!(record.channel, "ARD");
        assert_eq!(record.show, "Tagesschau");
    }

    #[test]
    fn test_numeric_fields() {
        let mut record = CatalogRecord::default();
        record.apply(5, "01:02:03");
        record.apply(6, "512");
        record.apply(16, "1580515200");
        assert_eq!(record.duration, Some(3723));
        assert_eq!(record.size, 512);
        assert_eq!(record.aired_epoch, 1580515200);

        record.apply(5, "00:00:00");
        record.apply(6, "");
        record.apply(16, "n/a");
        assert_eq!(record.duration, None);
        assert_eq!(record.size, 512);
        assert_eq!(record.aired_epoch, 1580515200);
    }

    #[test]
    fn test_reserved_positions_are_noops() {
        let mut record = CatalogRecord::default();
        for position in [11, 13, 15, 17, 19, 42] {
            record.apply(position, "rtmp://ignored");
        }
        assert_eq!(record, CatalogRecord::default());
    }

    #[test]
    fn test_subtitle_url_position() {
        let mut record = CatalogRecord::default();
        record.apply(10, "https://example.com/sub.xml");
        assert_eq!(record.url_sub, "https://example.com/sub.xml");
    }
}
