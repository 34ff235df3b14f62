use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Private,
    Unlisted,
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Private => write!(f, "private"),
            Self::Unlisted => write!(f, "unlisted"),
        }
    }
}

impl std::str::FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            "unlisted" => Ok(Self::Unlisted),
            other => Err(format!("unknown visibility '{}'", other)),
        }
    }
}

/// One row of `channel_stats`. Appended once per channel-stats run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub channel_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub published_at: Option<String>,
    pub subscriber_count: i64,
    pub view_count: i64,
    pub video_count: i64,
    pub collected_at: DateTime<Utc>,
}

/// A normalized video, keyed by `video_id`.
///
/// Fields are partitioned by owner: the collector writes everything up to
/// `thumbnail_url`, the show mapper writes `show`/`episode_num`, and
/// `exclude_from_stats` is only ever changed by a manual edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub video_id: String,
    pub channel_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub upload_time: DateTime<Utc>,
    pub duration_seconds: i64,
    pub watch_url: String,
    pub view_count: Option<i64>,
    pub like_count: Option<i64>,
    pub dislike_count: Option<i64>,
    pub comment_count: Option<i64>,
    pub subscribers_gained: Option<i64>,
    pub visibility: Option<Visibility>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub is_short: bool,
    pub is_draft: bool,
    pub thumbnail_url: Option<String>,

    // Classification-owned
    pub show: Option<String>,
    pub episode_num: Option<i64>,

    // Manual-owned
    pub exclude_from_stats: bool,

    pub collected_at: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Views attributed to one traffic source type for a video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSourceRow {
    pub traffic_source: String,
    pub views: i64,
}

/// Which videos `Database::list_videos` returns.
#[derive(Debug, Clone, Default)]
pub struct VideoFilter {
    /// Only videos with no show and no episode assigned yet.
    pub unmapped_only: bool,
    /// Include rows flagged `exclude_from_stats`.
    pub include_excluded: bool,
    pub channel_id: Option<String>,
    pub limit: Option<usize>,
}

/// Changes made by a schema migration pass. Columns are `table.column`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub tables_created: Vec<String>,
    pub columns_added: Vec<String>,
    /// Values copied from a legacy column into its replacement.
    pub values_carried: Vec<String>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.tables_created.is_empty()
            && self.columns_added.is_empty()
            && self.values_carried.is_empty()
    }
}
