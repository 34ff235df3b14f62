use crate::database::{ChannelSnapshot, TrafficSourceRow};
use crate::error::CollectError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Upstream listing calls return at most this many items per page.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// What a listing run walks over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListTarget {
    /// Every upload of a channel.
    Channel(String),
    /// An explicit set of video ids.
    Videos(Vec<String>),
    /// Exactly one video; the run ends once it has been returned.
    Video(String),
}

impl std::fmt::Display for ListTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Channel(id) => write!(f, "channel {}", id),
            Self::Videos(ids) => write!(f, "{} video ids", ids.len()),
            Self::Video(id) => write!(f, "video {}", id),
        }
    }
}

/// One page of a listing call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoPage {
    #[serde(default)]
    pub items: Vec<RawVideo>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

// ============================================================================
// Raw upstream shapes (field names follow the upstream JSON)
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawVideo {
    pub id: String,
    #[serde(default)]
    pub snippet: RawSnippet,
    #[serde(default)]
    pub statistics: RawStatistics,
    #[serde(default)]
    pub content_details: RawContentDetails,
    #[serde(default)]
    pub status: RawStatus,
    #[serde(default)]
    pub recording_details: Option<RawRecordingDetails>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSnippet {
    pub channel_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub published_at: Option<String>,
    pub category_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub thumbnails: BTreeMap<String, RawThumbnail>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawThumbnail {
    pub url: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Counters arrive as decimal strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStatistics {
    pub view_count: Option<String>,
    pub like_count: Option<String>,
    pub dislike_count: Option<String>,
    pub comment_count: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawContentDetails {
    pub duration: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStatus {
    pub privacy_status: Option<String>,
    pub upload_status: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecordingDetails {
    pub recording_date: Option<String>,
}

/// The remote analytics API, as seen by the collector.
///
/// Implementations own transport, auth, timeouts and retries. Every call is
/// blocking; an `Err` is treated as a failure of that call only.
pub trait RemoteSource {
    fn fetch_channel(&self, channel_id: &str) -> Result<ChannelSnapshot, CollectError>;

    fn list_videos(
        &self,
        target: &ListTarget,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<VideoPage, CollectError>;

    fn fetch_traffic_sources(&self, video_id: &str) -> Result<Vec<TrafficSourceRow>, CollectError>;

    /// Subscribers gained from one video. Sources without subscriber
    /// analytics report `None`.
    fn fetch_subscribers_gained(&self, _video_id: &str) -> Result<Option<i64>, CollectError> {
        Ok(None)
    }

    fn max_page_size(&self) -> usize {
        DEFAULT_PAGE_SIZE
    }
}
