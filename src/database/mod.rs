pub mod models;
mod schema;


use crate::error::AppError;
use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

pub use models::*;

/// Columns the collector owns. Re-collecting a video overwrites exactly these,
/// except that a null analytics value never replaces a stored one.
const COLLECTION_COLUMNS: &[&str] = &[
    "channel_id",
    "title",
    "description",
    "upload_time",
    "duration",
    "watch_url",
    "view_count",
    "like_count",
    "dislike_count",
    "comment_count",
    "subscribers_gained",
    "visibility",
    "category",
    "tags",
    "is_short",
    "is_draft",
    "thumbnail_url",
];

/// Analytics columns. A run that could not fetch them keeps the stored value.
const ANALYTICS_COLUMNS: &[&str] = &["subscribers_gained"];

/// Text timestamps written by SQLite's `CURRENT_TIMESTAMP`.
const SQLITE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

const VIDEO_SELECT: &str = "SELECT video_id, channel_id, title, description, upload_time, duration,
        watch_url, view_count, like_count, dislike_count, comment_count, subscribers_gained,
        visibility, category, tags, is_short, is_draft, thumbnail_url, show, episode_num,
        exclude_from_stats, collected_at, last_updated
     FROM video_stats";

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the store and migrate it to the current schema.
    ///
    /// A failed migration is fatal: the store is not handed out, so nothing
    /// can be written against a schema in an unknown state.
    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA cache_size=10000;
            PRAGMA temp_store=MEMORY;
            PRAGMA foreign_keys=ON;
        ",
        )?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        let report = db
            .migrate()
            .map_err(|e| AppError::Migration(e.to_string()))?;
        if !report.is_noop() {
            log::info!(
                "Schema migrated: created tables {:?}, added columns {:?}, carried {:?}",
                report.tables_created,
                report.columns_added,
                report.values_carried
            );
        }

        Ok(db)
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))
    }

    /// Add any tables or columns missing from the target schema.
    pub fn migrate(&self) -> Result<MigrationReport> {
        let mut conn = self.conn()?;
        schema::migrate(&mut conn)
    }

    // =========================================================================
    // Videos
    // =========================================================================

    /// Insert a video, or refresh the collection-owned columns of an existing
    /// one. Show, episode and the exclude flag are never written here.
    pub fn upsert_video(&self, record: &VideoRecord) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        upsert_video_in(&tx, record, &now_timestamp())?;
        tx.commit()?;
        Ok(())
    }

    /// Upsert a video and, when `traffic` is given, replace its traffic
    /// sources, all in one transaction.
    pub fn save_collected_video(
        &self,
        record: &VideoRecord,
        traffic: Option<&[TrafficSourceRow]>,
    ) -> Result<()> {
        let now = now_timestamp();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        upsert_video_in(&tx, record, &now)?;
        if let Some(rows) = traffic {
            replace_traffic_in(&tx, &record.video_id, rows, &now)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_video(&self, video_id: &str) -> Result<Option<VideoRecord>> {
        let conn = self.conn()?;
        let video = conn
            .query_row(
                &format!("{} WHERE video_id = ?1", VIDEO_SELECT),
                params![video_id],
                row_to_video,
            )
            .optional()?;
        Ok(video)
    }

    /// Videos matching `filter`, oldest upload first, ties broken by id.
    pub fn list_videos(&self, filter: &VideoFilter) -> Result<Vec<VideoRecord>> {
        let conn = self.conn()?;

        let mut conditions = Vec::new();
        if filter.unmapped_only {
            conditions.push("(show IS NULL OR show = '')");
            conditions.push("(episode_num IS NULL OR episode_num = 0)");
        }
        if !filter.include_excluded {
            conditions.push("exclude_from_stats = 0");
        }
        if filter.channel_id.is_some() {
            conditions.push("channel_id = ?1");
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let limit_clause = match filter.limit {
            Some(limit) => format!("LIMIT {}", limit),
            None => String::new(),
        };

        let sql = format!(
            "{} {} ORDER BY upload_time ASC, video_id ASC {}",
            VIDEO_SELECT, where_clause, limit_clause
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = match &filter.channel_id {
            Some(channel_id) => stmt
                .query_map(params![channel_id], row_to_video)?
                .collect::<Vec<_>>(),
            None => stmt.query_map([], row_to_video)?.collect::<Vec<_>>(),
        };

        // One unreadable row must not hide the rest of the table.
        let mut videos = Vec::with_capacity(rows.len());
        for row in rows {
            match row {
                Ok(video) => videos.push(video),
                Err(e) => log::warn!("Skipping unreadable video row: {}", e),
            }
        }

        Ok(videos)
    }

    /// Write the show mapper's result. Touches only show, episode and
    /// last_updated.
    pub fn update_show_episode(
        &self,
        video_id: &str,
        show: Option<&str>,
        episode_num: Option<i64>,
    ) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE video_stats SET show = ?1, episode_num = ?2, last_updated = ?3
             WHERE video_id = ?4",
            params![show, episode_num, now_timestamp(), video_id],
        )?;
        if changed == 0 {
            return Err(AppError::NotFound(format!("video {}", video_id)).into());
        }
        Ok(())
    }

    /// Manual override: hide a video from reports and from show mapping.
    pub fn set_excluded(&self, video_id: &str, excluded: bool) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE video_stats SET exclude_from_stats = ?1 WHERE video_id = ?2",
            params![excluded as i32, video_id],
        )?;
        if changed == 0 {
            return Err(AppError::NotFound(format!("video {}", video_id)).into());
        }
        Ok(())
    }

    // =========================================================================
    // Traffic sources
    // =========================================================================

    /// Delete every traffic row for the video and insert `rows`, atomically.
    /// On failure the previous rows are left as they were.
    pub fn replace_traffic_sources(&self, video_id: &str, rows: &[TrafficSourceRow]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        replace_traffic_in(&tx, video_id, rows, &now_timestamp())?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_traffic_sources(&self, video_id: &str) -> Result<Vec<TrafficSourceRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT traffic_source, views FROM traffic_sources
             WHERE video_id = ?1
             ORDER BY views DESC, traffic_source ASC",
        )?;
        let rows = stmt
            .query_map(params![video_id], |row| {
                Ok(TrafficSourceRow {
                    traffic_source: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                    views: row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // =========================================================================
    // Channel snapshots
    // =========================================================================

    pub fn append_channel_snapshot(&self, snapshot: &ChannelSnapshot) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO channel_stats
                (channel_id, title, description, subscriber_count, view_count, video_count, published_at, collected_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                snapshot.channel_id,
                snapshot.title,
                snapshot.description,
                snapshot.subscriber_count,
                snapshot.view_count,
                snapshot.video_count,
                snapshot.published_at,
                format_timestamp(&snapshot.collected_at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Snapshot history, newest first.
    pub fn get_channel_history(&self, channel_id: Option<&str>) -> Result<Vec<ChannelSnapshot>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT channel_id, title, description, published_at, subscriber_count,
                    view_count, video_count, collected_at
             FROM channel_stats
             WHERE ?1 IS NULL OR channel_id = ?1
             ORDER BY collected_at DESC, id DESC",
        )?;
        let snapshots = stmt
            .query_map(params![channel_id], |row| {
                Ok(ChannelSnapshot {
                    channel_id: row.get(0)?,
                    title: row.get(1)?,
                    description: row.get(2)?,
                    published_at: row.get(3)?,
                    subscriber_count: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
                    view_count: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
                    video_count: row.get::<_, Option<i64>>(6)?.unwrap_or(0),
                    collected_at: parse_timestamp(7, row.get(7)?)?.unwrap_or_default(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(snapshots)
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Row count for every user table.
    pub fn table_counts(&self) -> Result<BTreeMap<String, i64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )?;
        let tables = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut counts = BTreeMap::new();
        for table in tables {
            let count: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
            counts.insert(table, count);
        }
        Ok(counts)
    }
}

fn upsert_sql() -> String {
    let columns = COLLECTION_COLUMNS.join(", ");
    let placeholders = (2..=COLLECTION_COLUMNS.len() + 1)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");
    let now_param = COLLECTION_COLUMNS.len() + 2;
    let updates = COLLECTION_COLUMNS
        .iter()
        .map(|c| {
            if ANALYTICS_COLUMNS.contains(c) {
                format!("{c} = COALESCE(excluded.{c}, {c})")
            } else {
                format!("{c} = excluded.{c}")
            }
        })
        .collect::<Vec<_>>()
        .join(",\n        ");

    format!(
        "INSERT INTO video_stats (video_id, {columns}, collected_at, last_updated)
     VALUES (?1, {placeholders}, ?{now_param}, ?{now_param})
     ON CONFLICT(video_id) DO UPDATE SET
        {updates},
        last_updated = excluded.last_updated"
    )
}

fn upsert_video_in(conn: &Connection, record: &VideoRecord, now: &str) -> Result<()> {
    let tags = if record.tags.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&record.tags)?)
    };

    // Parameter order follows COLLECTION_COLUMNS.
    conn.execute(
        &upsert_sql(),
        params![
            record.video_id,
            record.channel_id,
            record.title,
            record.description,
            format_timestamp(&record.upload_time),
            record.duration_seconds,
            record.watch_url,
            record.view_count,
            record.like_count,
            record.dislike_count,
            record.comment_count,
            record.subscribers_gained,
            record.visibility.as_ref().map(|v| v.to_string()),
            record.category,
            tags,
            record.is_short as i32,
            record.is_draft as i32,
            record.thumbnail_url,
            now,
        ],
    )?;
    Ok(())
}

fn replace_traffic_in(
    conn: &Connection,
    video_id: &str,
    rows: &[TrafficSourceRow],
    now: &str,
) -> Result<()> {
    conn.execute(
        "DELETE FROM traffic_sources WHERE video_id = ?1",
        params![video_id],
    )?;

    let mut stmt = conn.prepare(
        "INSERT INTO traffic_sources (video_id, traffic_source, views, collected_at)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for row in rows {
        stmt.execute(params![video_id, row.traffic_source, row.views, now])?;
    }
    Ok(())
}

fn row_to_video(row: &Row<'_>) -> rusqlite::Result<VideoRecord> {
    let upload_time = parse_timestamp(4, row.get(4)?)?.unwrap_or_default();

    let visibility = match row.get::<_, Option<String>>(12)? {
        Some(v) => Some(
            v.parse::<Visibility>()
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(12, Type::Text, e.into()))?,
        ),
        None => None,
    };

    let tags = row
        .get::<_, Option<String>>(14)?
        .map(|text| parse_tags(&text))
        .unwrap_or_default();

    Ok(VideoRecord {
        video_id: row.get(0)?,
        channel_id: row.get(1)?,
        title: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        description: row.get(3)?,
        upload_time,
        duration_seconds: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
        watch_url: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        view_count: row.get(7)?,
        like_count: row.get(8)?,
        dislike_count: row.get(9)?,
        comment_count: row.get(10)?,
        subscribers_gained: row.get(11)?,
        visibility,
        category: row.get(13)?,
        tags,
        is_short: row.get::<_, Option<i32>>(15)?.unwrap_or(0) == 1,
        is_draft: row.get::<_, Option<i32>>(16)?.unwrap_or(0) == 1,
        thumbnail_url: row.get(17)?,
        show: row.get(18)?,
        episode_num: row.get(19)?,
        exclude_from_stats: row.get::<_, Option<i32>>(20)?.unwrap_or(0) == 1,
        collected_at: parse_timestamp(21, row.get(21)?)?,
        last_updated: parse_timestamp(22, row.get(22)?)?,
    })
}

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Tags are written as a JSON array. Older stores hold comma-separated text.
fn parse_tags(text: &str) -> Vec<String> {
    serde_json::from_str::<Vec<String>>(text).unwrap_or_else(|_| {
        text.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    })
}

/// RFC 3339, or SQLite's `CURRENT_TIMESTAMP` text taken as UTC.
fn parse_timestamp(idx: usize, value: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let Some(text) = value else {
        return Ok(None);
    };
    match DateTime::parse_from_rfc3339(&text) {
        Ok(ts) => Ok(Some(ts.with_timezone(&Utc))),
        Err(e) => NaiveDateTime::parse_from_str(&text, SQLITE_TIMESTAMP_FORMAT)
            .map(|naive| Some(Utc.from_utc_datetime(&naive)))
            .map_err(|_| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
    }
}
