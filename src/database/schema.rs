// Target schema and additive migrations.
// Columns are only ever added. Never drop or rename a column here.

use super::models::MigrationReport;
use anyhow::{bail, Result};
use rusqlite::Connection;
use std::collections::HashSet;

pub(crate) struct ColumnDef {
    pub name: &'static str,
    pub decl: &'static str,
    /// Key columns only exist from table creation; ALTER TABLE cannot add them.
    pub key: bool,
}

pub(crate) struct TableDef {
    pub name: &'static str,
    pub columns: &'static [ColumnDef],
    pub constraints: &'static [&'static str],
    pub indexes: &'static [&'static str],
}

const fn col(name: &'static str, decl: &'static str) -> ColumnDef {
    ColumnDef { name, decl, key: false }
}

const fn key(name: &'static str, decl: &'static str) -> ColumnDef {
    ColumnDef { name, decl, key: true }
}

pub(crate) const CHANNEL_STATS: TableDef = TableDef {
    name: "channel_stats",
    columns: &[
        key("id", "INTEGER PRIMARY KEY AUTOINCREMENT"),
        key("channel_id", "TEXT NOT NULL"),
        col("title", "TEXT"),
        col("description", "TEXT"),
        col("subscriber_count", "INTEGER DEFAULT 0"),
        col("view_count", "INTEGER DEFAULT 0"),
        col("video_count", "INTEGER DEFAULT 0"),
        col("published_at", "TEXT"),
        col("collected_at", "TEXT"),
    ],
    constraints: &[],
    indexes: &[
        "CREATE INDEX IF NOT EXISTS idx_channel_stats_channel ON channel_stats(channel_id, collected_at)",
    ],
};

pub(crate) const VIDEO_STATS: TableDef = TableDef {
    name: "video_stats",
    columns: &[
        key("id", "INTEGER PRIMARY KEY AUTOINCREMENT"),
        key("video_id", "TEXT NOT NULL UNIQUE"),
        col("channel_id", "TEXT"),
        col("title", "TEXT"),
        col("description", "TEXT"),
        col("upload_time", "TEXT"),
        col("duration", "INTEGER DEFAULT 0"),
        col("watch_url", "TEXT"),
        col("view_count", "INTEGER"),
        col("like_count", "INTEGER"),
        col("dislike_count", "INTEGER"),
        col("comment_count", "INTEGER"),
        col("subscribers_gained", "INTEGER DEFAULT NULL"),
        col("visibility", "TEXT DEFAULT NULL"),
        col("category", "TEXT DEFAULT NULL"),
        col("tags", "TEXT DEFAULT NULL"),
        col("is_short", "INTEGER DEFAULT 0"),
        col("is_draft", "INTEGER DEFAULT 0"),
        col("thumbnail_url", "TEXT DEFAULT NULL"),
        col("show", "TEXT DEFAULT NULL"),
        col("episode_num", "INTEGER DEFAULT NULL"),
        col("exclude_from_stats", "INTEGER DEFAULT 0"),
        col("collected_at", "TEXT"),
        col("last_updated", "TEXT"),
    ],
    constraints: &[],
    indexes: &[
        "CREATE INDEX IF NOT EXISTS idx_video_stats_upload ON video_stats(upload_time, video_id)",
        "CREATE INDEX IF NOT EXISTS idx_video_stats_show ON video_stats(show, episode_num)",
    ],
};

pub(crate) const TRAFFIC_SOURCES: TableDef = TableDef {
    name: "traffic_sources",
    columns: &[
        key("id", "INTEGER PRIMARY KEY AUTOINCREMENT"),
        key("video_id", "TEXT NOT NULL"),
        col("traffic_source", "TEXT"),
        col("views", "INTEGER DEFAULT 0"),
        col("collected_at", "TEXT"),
    ],
    constraints: &["FOREIGN KEY (video_id) REFERENCES video_stats(video_id) ON DELETE CASCADE"],
    indexes: &["CREATE INDEX IF NOT EXISTS idx_traffic_sources_video ON traffic_sources(video_id)"],
};

/// Columns renamed since earlier store layouts, as (table, old, new). When
/// `new` is added to a table that still has `old`, values are copied over.
const CARRIED_COLUMNS: &[(&str, &str, &str)] =
    &[("video_stats", "subscriber_count", "subscribers_gained")];

pub(crate) const TABLES: &[&TableDef] = &[&CHANNEL_STATS, &VIDEO_STATS, &TRAFFIC_SOURCES];

impl TableDef {
    fn create_sql(&self) -> String {
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.decl))
            .collect();
        parts.extend(self.constraints.iter().map(|c| c.to_string()));
        format!("CREATE TABLE {} (\n    {}\n)", self.name, parts.join(",\n    "))
    }
}

pub(crate) fn table_columns(conn: &Connection, table: &str) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(names)
}

/// Bring every table up to the target schema inside one transaction.
///
/// Missing tables are created, missing columns are added with their
/// declared default. Running it against an up-to-date store changes nothing.
pub(crate) fn migrate(conn: &mut Connection) -> Result<MigrationReport> {
    let tx = conn.transaction()?;
    let mut report = MigrationReport::default();

    for table in TABLES {
        let existing = table_columns(&tx, table.name)?;

        if existing.is_empty() {
            tx.execute_batch(&table.create_sql())?;
            report.tables_created.push(table.name.to_string());
        } else {
            for column in table.columns {
                if existing.contains(column.name) {
                    continue;
                }
                if column.key {
                    bail!(
                        "table {} is missing key column {} and cannot be migrated in place",
                        table.name,
                        column.name
                    );
                }
                tx.execute(
                    &format!(
                        "ALTER TABLE {} ADD COLUMN {} {}",
                        table.name, column.name, column.decl
                    ),
                    [],
                )?;
                report
                    .columns_added
                    .push(format!("{}.{}", table.name, column.name));

                for &(carried_table, old, new) in CARRIED_COLUMNS {
                    if carried_table != table.name || new != column.name || !existing.contains(old) {
                        continue;
                    }
                    let copied = tx.execute(
                        &format!(
                            "UPDATE {} SET {new} = {old} WHERE {new} IS NULL AND {old} IS NOT NULL",
                            table.name
                        ),
                        [],
                    )?;
                    report
                        .values_carried
                        .push(format!("{}.{} -> {} ({} rows)", table.name, old, new, copied));
                }
            }
        }

        for index in table.indexes {
            tx.execute_batch(index)?;
        }
    }

    tx.commit()?;
    Ok(report)
}
