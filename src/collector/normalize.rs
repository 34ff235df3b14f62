use super::source::{RawRecordingDetails, RawSnippet, RawThumbnail, RawVideo};
use crate::database::{VideoRecord, Visibility};
use crate::error::CollectError;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

const SHORT_MAX_SECONDS: i64 = 60;
/// Shorts with strong markers can run slightly long after processing.
const SHORT_MAX_SECONDS_WITH_MARKERS: i64 = 65;
const SHORTS_HASHTAGS: &[&str] = &["#shorts", "#short", "#youtubeshorts", "#ytshorts"];
const THUMBNAIL_PREFERENCE: &[&str] = &["maxres", "high", "medium", "default"];

fn duration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^P(?:(\d+)W)?(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?)?$")
            .expect("duration regex is valid")
    })
}

/// Convert an ISO-8601 duration such as `PT1H30M5S` or `P0D` to whole
/// seconds. Missing components count as zero.
pub fn parse_duration(expr: &str) -> Result<i64, CollectError> {
    let malformed = || CollectError::MalformedData(format!("invalid duration '{}'", expr));
    let expr = expr.trim();

    // "P", "PT" and "P1DT" carry no component after the designator.
    if expr.len() < 2 || expr.ends_with('T') {
        return Err(malformed());
    }

    let caps = duration_regex().captures(expr).ok_or_else(malformed)?;

    let mut total: i64 = 0;
    for (group, unit) in [(1, 604_800), (2, 86_400), (3, 3_600), (4, 60), (5, 1)] {
        if let Some(m) = caps.get(group) {
            let value: i64 = m.as_str().parse().map_err(|_| malformed())?;
            total = value
                .checked_mul(unit)
                .and_then(|v| total.checked_add(v))
                .ok_or_else(malformed)?;
        }
    }
    Ok(total)
}

pub fn parse_counter(field: &str, value: Option<&str>) -> Result<Option<i64>, CollectError> {
    match value {
        None => Ok(None),
        Some(text) => text.trim().parse::<i64>().map(Some).map_err(|_| {
            CollectError::MalformedData(format!("{} is not a number: '{}'", field, text))
        }),
    }
}

pub fn parse_visibility(privacy_status: Option<&str>) -> Result<Option<Visibility>, CollectError> {
    match privacy_status {
        None => Ok(None),
        Some(status) => status
            .parse::<Visibility>()
            .map(Some)
            .map_err(CollectError::MalformedData),
    }
}

pub fn parse_published_at(text: &str) -> Result<DateTime<Utc>, CollectError> {
    DateTime::parse_from_rfc3339(text.trim())
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| CollectError::MalformedData(format!("invalid publishedAt '{}': {}", text, e)))
}

/// An upload that has not finished processing is still a draft.
pub fn is_draft(upload_status: Option<&str>) -> bool {
    matches!(upload_status, Some("uploaded") | Some("draft"))
}

/// Shorts are detected by duration, with a small allowance when the
/// metadata carries at least two Shorts markers.
pub fn detect_short(
    duration_seconds: i64,
    snippet: &RawSnippet,
    recording: Option<&RawRecordingDetails>,
) -> bool {
    if duration_seconds <= 0 {
        return false;
    }
    if duration_seconds <= SHORT_MAX_SECONDS {
        return true;
    }

    let description = snippet.description.as_deref().unwrap_or("").to_lowercase();
    let title = snippet.title.as_deref().unwrap_or("").to_lowercase();

    let mut markers = 0;
    if recording.and_then(|r| r.recording_date.as_ref()).is_some() {
        markers += 1;
    }
    if SHORTS_HASHTAGS.iter().any(|tag| description.contains(tag)) {
        markers += 1;
    }
    if title.contains("#shorts") || title.contains("#short") {
        markers += 1;
    }
    if snippet.tags.iter().any(|t| t.to_lowercase().contains("short")) {
        markers += 1;
    }

    markers >= 2 && duration_seconds <= SHORT_MAX_SECONDS_WITH_MARKERS
}

pub fn best_thumbnail(thumbnails: &BTreeMap<String, RawThumbnail>) -> Option<String> {
    THUMBNAIL_PREFERENCE
        .iter()
        .filter_map(|size| thumbnails.get(*size))
        .chain(thumbnails.values())
        .find_map(|t| t.url.clone())
}

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

/// Turn one raw upstream record into a `VideoRecord`.
///
/// Classification and manual fields are left unset; the store never
/// writes them from a collected record anyway.
pub fn normalize_video(raw: &RawVideo) -> Result<VideoRecord, CollectError> {
    if raw.id.trim().is_empty() {
        return Err(CollectError::MalformedData("record has no video id".to_string()));
    }
    let snippet = &raw.snippet;

    let title = snippet
        .title
        .clone()
        .ok_or_else(|| CollectError::MalformedData("missing title".to_string()))?;
    let published_at = snippet
        .published_at
        .as_deref()
        .ok_or_else(|| CollectError::MalformedData("missing publishedAt".to_string()))?;
    let duration = raw
        .content_details
        .duration
        .as_deref()
        .ok_or_else(|| CollectError::MalformedData("missing duration".to_string()))?;

    let duration_seconds = parse_duration(duration)?;
    let stats = &raw.statistics;

    Ok(VideoRecord {
        video_id: raw.id.clone(),
        channel_id: snippet.channel_id.clone(),
        title,
        description: snippet.description.clone(),
        upload_time: parse_published_at(published_at)?,
        duration_seconds,
        watch_url: watch_url(&raw.id),
        view_count: parse_counter("viewCount", stats.view_count.as_deref())?,
        like_count: parse_counter("likeCount", stats.like_count.as_deref())?,
        dislike_count: parse_counter("dislikeCount", stats.dislike_count.as_deref())?,
        comment_count: parse_counter("commentCount", stats.comment_count.as_deref())?,
        subscribers_gained: None,
        visibility: parse_visibility(raw.status.privacy_status.as_deref())?,
        category: snippet.category_id.clone(),
        tags: snippet.tags.clone(),
        is_short: detect_short(duration_seconds, snippet, raw.recording_details.as_ref()),
        is_draft: is_draft(raw.status.upload_status.as_deref()),
        thumbnail_url: best_thumbnail(&snippet.thumbnails),
        show: None,
        episode_num: None,
        exclude_from_stats: false,
        collected_at: None,
        last_updated: None,
    })
}
