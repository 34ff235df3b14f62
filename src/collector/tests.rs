// Collection pipeline tests against an in-memory source.
// Run with: cargo test --lib collector::tests

use super::source::{RawContentDetails, RawSnippet, RawStatistics, RawStatus};
use super::*;
use crate::database::{Database, TrafficSourceRow};
use chrono::Utc;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use tempfile::TempDir;

fn raw_video(i: usize) -> RawVideo {
    RawVideo {
        id: format!("vid{:03}", i),
        snippet: RawSnippet {
            channel_id: Some("UC_TEST".to_string()),
            title: Some(format!("DOU News #{}", i)),
            description: Some("weekly news".to_string()),
            published_at: Some(format!("2024-01-01T00:{:02}:{:02}Z", (i / 60) % 60, i % 60)),
            ..Default::default()
        },
        statistics: RawStatistics {
            view_count: Some((i * 10).to_string()),
            like_count: Some(i.to_string()),
            dislike_count: None,
            comment_count: Some("0".to_string()),
        },
        content_details: RawContentDetails {
            duration: Some("PT5M".to_string()),
        },
        status: RawStatus {
            privacy_status: Some("public".to_string()),
            upload_status: Some("processed".to_string()),
        },
        recording_details: None,
    }
}

/// Serves fixed-size pages regardless of the requested size, so callers
/// must enforce their own cap.
struct FakeSource {
    videos: Vec<RawVideo>,
    page_len: usize,
    traffic: RefCell<HashMap<String, Vec<TrafficSourceRow>>>,
    failing_traffic: HashSet<String>,
    fail_listing_on_call: Option<usize>,
    subscribers: Cell<Option<i64>>,
    fail_subscribers: Cell<bool>,
    list_calls: Cell<usize>,
    traffic_calls: Cell<usize>,
    requested_sizes: RefCell<Vec<usize>>,
}

impl FakeSource {
    fn new(count: usize, page_len: usize) -> Self {
        Self {
            videos: (0..count).map(raw_video).collect(),
            page_len,
            traffic: RefCell::new(HashMap::new()),
            failing_traffic: HashSet::new(),
            fail_listing_on_call: None,
            subscribers: Cell::new(None),
            fail_subscribers: Cell::new(false),
            list_calls: Cell::new(0),
            traffic_calls: Cell::new(0),
            requested_sizes: RefCell::new(Vec::new()),
        }
    }

    fn set_traffic(&self, video_id: &str, rows: &[(&str, i64)]) {
        self.traffic.borrow_mut().insert(
            video_id.to_string(),
            rows.iter()
                .map(|(source, views)| TrafficSourceRow {
                    traffic_source: source.to_string(),
                    views: *views,
                })
                .collect(),
        );
    }
}

impl RemoteSource for FakeSource {
    fn fetch_channel(&self, channel_id: &str) -> Result<ChannelSnapshot, CollectError> {
        Ok(ChannelSnapshot {
            channel_id: channel_id.to_string(),
            title: Some("Test Channel".to_string()),
            description: None,
            published_at: Some("2020-01-01T00:00:00Z".to_string()),
            subscriber_count: 1000,
            view_count: 50_000,
            video_count: self.videos.len() as i64,
            collected_at: Utc::now(),
        })
    }

    fn list_videos(
        &self,
        target: &ListTarget,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<VideoPage, CollectError> {
        let call = self.list_calls.get() + 1;
        self.list_calls.set(call);
        self.requested_sizes.borrow_mut().push(page_size);
        if self.fail_listing_on_call == Some(call) {
            return Err(CollectError::Source("quota exceeded".to_string()));
        }

        let pool: Vec<RawVideo> = match target {
            ListTarget::Channel(_) => self.videos.clone(),
            ListTarget::Videos(ids) => ids
                .iter()
                .filter_map(|id| self.videos.iter().find(|v| &v.id == id).cloned())
                .collect(),
            ListTarget::Video(id) => self.videos.iter().filter(|v| &v.id == id).cloned().collect(),
        };

        let page: usize = page_token.map(|t| t.parse().unwrap()).unwrap_or(0);
        let start = page * self.page_len;
        let end = (start + self.page_len).min(pool.len());
        let items = if start < pool.len() { pool[start..end].to_vec() } else { Vec::new() };
        let next_page_token = if end < pool.len() { Some((page + 1).to_string()) } else { None };

        Ok(VideoPage {
            items,
            next_page_token,
        })
    }

    fn fetch_traffic_sources(&self, video_id: &str) -> Result<Vec<TrafficSourceRow>, CollectError> {
        self.traffic_calls.set(self.traffic_calls.get() + 1);
        if self.failing_traffic.contains(video_id) {
            return Err(CollectError::Source("analytics unavailable".to_string()));
        }
        Ok(self.traffic.borrow().get(video_id).cloned().unwrap_or_default())
    }

    fn fetch_subscribers_gained(&self, _video_id: &str) -> Result<Option<i64>, CollectError> {
        if self.fail_subscribers.get() {
            return Err(CollectError::Source("subscriber report unavailable".to_string()));
        }
        Ok(self.subscribers.get())
    }
}

fn setup_test_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("test.db")).unwrap();
    (db, temp_dir)
}

fn channel() -> ListTarget {
    ListTarget::Channel("UC_TEST".to_string())
}

fn capped(max: usize) -> CollectOptions {
    CollectOptions {
        max_videos: Some(max),
        ..Default::default()
    }
}

// =========================================================================
// Pagination
// =========================================================================

#[test]
fn test_cap_truncates_final_page() {
    let source = FakeSource::new(150, 50);
    let collector = Collector::new(&source, capped(30));
    let mut run = collector.collect(channel());

    let ids: Vec<String> = run.by_ref().map(|v| v.record.video_id).collect();
    let expected: Vec<String> = (0..30).map(|i| format!("vid{:03}", i)).collect();
    assert_eq!(ids, expected);
    assert_eq!(run.report().listed, 30);
    assert_eq!(run.report().pages_fetched, 1);
    assert_eq!(source.requested_sizes.borrow().as_slice(), &[30]);
}

#[test]
fn test_cap_spanning_pages() {
    let source = FakeSource::new(150, 50);
    let collector = Collector::new(&source, capped(120));
    let mut run = collector.collect(channel());

    assert_eq!(run.by_ref().count(), 120);
    assert_eq!(run.report().pages_fetched, 3);
    assert_eq!(source.requested_sizes.borrow().as_slice(), &[50, 50, 20]);
}

#[test]
fn test_unlimited_runs_to_exhaustion() {
    let source = FakeSource::new(150, 50);
    let collector = Collector::new(&source, CollectOptions::default());
    let mut run = collector.collect(channel());

    assert_eq!(run.by_ref().count(), 150);
    let report = run.into_report();
    assert_eq!(report.succeeded, 150);
    assert_eq!(report.pages_fetched, 3);
    assert_eq!(report.failed, 0);
}

#[test]
fn test_zero_cap_means_unlimited() {
    let source = FakeSource::new(70, 50);
    let collector = Collector::new(&source, capped(0));
    assert_eq!(collector.collect(channel()).count(), 70);
}

#[test]
fn test_pages_fetched_lazily() {
    let source = FakeSource::new(150, 50);
    let collector = Collector::new(&source, CollectOptions::default());
    let mut run = collector.collect(channel());
    assert_eq!(source.list_calls.get(), 0);

    let _first = run.next().unwrap();
    assert_eq!(source.list_calls.get(), 1);
}

#[test]
fn test_each_collect_call_restarts() {
    let source = FakeSource::new(60, 50);
    let collector = Collector::new(&source, CollectOptions::default());
    assert_eq!(collector.collect(channel()).count(), 60);
    assert_eq!(collector.collect(channel()).count(), 60);
}

#[test]
fn test_single_video_target_stops_after_one() {
    let source = FakeSource::new(10, 50);
    let collector = Collector::new(&source, CollectOptions::default());
    let mut run = collector.collect(ListTarget::Video("vid004".to_string()));

    let videos: Vec<_> = run.by_ref().collect();
    assert_eq!(videos.len(), 1);
    assert_eq!(videos[0].record.video_id, "vid004");
    assert_eq!(source.list_calls.get(), 1);
}

#[test]
fn test_missing_requested_ids_are_skipped() {
    let source = FakeSource::new(5, 50);
    let collector = Collector::new(&source, CollectOptions::default());
    let ids = vec!["vid001".to_string(), "nope".to_string(), "vid003".to_string()];
    let mut run = collector.collect(ListTarget::Videos(ids));

    assert_eq!(run.by_ref().count(), 2);
    assert_eq!(run.report().skipped, 1);
}

#[test]
fn test_duplicate_ids_are_skipped() {
    let mut source = FakeSource::new(3, 50);
    source.videos.push(raw_video(1));
    let collector = Collector::new(&source, CollectOptions::default());
    let mut run = collector.collect(channel());

    assert_eq!(run.by_ref().count(), 3);
    assert_eq!(run.report().skipped, 1);
}

#[test]
fn test_listing_failure_stops_run_without_raising() {
    let mut source = FakeSource::new(150, 50);
    source.fail_listing_on_call = Some(2);
    let collector = Collector::new(&source, CollectOptions::default());
    let mut run = collector.collect(channel());

    assert_eq!(run.by_ref().count(), 50);
    let report = run.into_report();
    assert_eq!(report.aborted.as_deref(), Some("source error: quota exceeded"));
    assert_eq!(report.succeeded, 50);
}

// =========================================================================
// Per-record failures
// =========================================================================

#[test]
fn test_partial_batch_resilience() {
    let (db, _temp) = setup_test_db();
    let mut source = FakeSource::new(10, 50);
    source.videos[4].content_details.duration = Some("five minutes".to_string());

    let ids: Vec<String> = (0..10).map(|i| format!("vid{:03}", i)).collect();
    let collector = Collector::new(&source, CollectOptions::default());
    let report = collector.collect(ListTarget::Videos(ids)).sync_into(&db);

    assert_eq!(report.succeeded, 9);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].video_id, "vid004");
    assert!(matches!(report.failures[0].error, CollectError::MalformedData(_)));
    assert_eq!(db.table_counts().unwrap()["video_stats"], 9);
    assert!(db.get_video("vid004").unwrap().is_none());
}

#[test]
fn test_traffic_failure_does_not_abort_batch() {
    let (db, _temp) = setup_test_db();
    let mut source = FakeSource::new(3, 50);
    source.failing_traffic.insert("vid001".to_string());
    source.set_traffic("vid000", &[("YT_SEARCH", 10)]);

    let report = Collector::new(&source, CollectOptions::default())
        .collect(channel())
        .sync_into(&db);

    assert_eq!(report.succeeded, 3);
    assert_eq!(report.analytics_failures, 1);
    assert_eq!(report.analytics_errors[0].video_id, "vid001");
    assert!(db.get_video("vid001").unwrap().is_some());
    assert_eq!(db.get_traffic_sources("vid000").unwrap().len(), 1);
}

#[test]
fn test_traffic_failure_keeps_previous_rows() {
    let (db, _temp) = setup_test_db();
    let mut source = FakeSource::new(1, 50);
    source.set_traffic("vid000", &[("YT_SEARCH", 10), ("SUGGESTED", 5)]);
    Collector::new(&source, CollectOptions::default())
        .collect(channel())
        .sync_into(&db);

    source.failing_traffic.insert("vid000".to_string());
    Collector::new(&source, CollectOptions::default())
        .collect(channel())
        .sync_into(&db);

    assert_eq!(db.get_traffic_sources("vid000").unwrap().len(), 2);
}

#[test]
fn test_no_analytics_mode_skips_traffic_calls() {
    let (db, _temp) = setup_test_db();
    let source = FakeSource::new(4, 50);
    let options = CollectOptions {
        include_analytics: false,
        ..Default::default()
    };
    let report = Collector::new(&source, options).collect(channel()).sync_into(&db);

    assert_eq!(report.succeeded, 4);
    assert_eq!(source.traffic_calls.get(), 0);
}

#[test]
fn test_subscriber_gains_survive_runs_without_analytics() {
    let (db, _temp) = setup_test_db();
    let source = FakeSource::new(1, 50);
    source.set_traffic("vid000", &[("YT_SEARCH", 40)]);
    source.subscribers.set(Some(42));

    let report = Collector::new(&source, CollectOptions::default())
        .collect(channel())
        .sync_into(&db);
    assert_eq!(report.succeeded, 1);
    assert_eq!(db.get_video("vid000").unwrap().unwrap().subscribers_gained, Some(42));

    let options = CollectOptions {
        include_analytics: false,
        ..Default::default()
    };
    Collector::new(&source, options).collect(channel()).sync_into(&db);
    assert_eq!(db.get_video("vid000").unwrap().unwrap().subscribers_gained, Some(42));
    assert_eq!(db.get_traffic_sources("vid000").unwrap().len(), 1);

    source.fail_subscribers.set(true);
    let report = Collector::new(&source, CollectOptions::default())
        .collect(channel())
        .sync_into(&db);
    assert_eq!(report.analytics_failures, 1);
    assert_eq!(report.succeeded, 1);
    assert_eq!(db.get_video("vid000").unwrap().unwrap().subscribers_gained, Some(42));
}

#[test]
fn test_store_failure_is_counted() {
    let (db, _temp) = setup_test_db();
    {
        let conn = db.conn().unwrap();
        conn.execute_batch(
            "CREATE TRIGGER reject_vid002 BEFORE INSERT ON video_stats
             WHEN NEW.video_id = 'vid002'
             BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        )
        .unwrap();
    }
    let source = FakeSource::new(4, 50);
    let report = Collector::new(&source, CollectOptions::default())
        .collect(channel())
        .sync_into(&db);

    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed, 1);
    assert!(matches!(report.failures[0].error, CollectError::Persistence(_)));
}

// =========================================================================
// Cancellation
// =========================================================================

#[test]
fn test_cancellation_stops_at_record_boundary() {
    let source = FakeSource::new(150, 50);
    let cancel = CancellationToken::new();
    let collector =
        Collector::new(&source, CollectOptions::default()).with_cancellation(cancel.clone());
    let mut run = collector.collect(channel());

    let first: Vec<_> = run.by_ref().take(5).collect();
    assert_eq!(first.len(), 5);
    cancel.cancel();
    assert!(run.next().is_none());

    let report = run.into_report();
    assert!(report.cancelled);
    assert_eq!(report.succeeded, 5);
    assert_eq!(source.list_calls.get(), 1);
}

#[test]
fn test_cancelled_before_start_fetches_nothing() {
    let source = FakeSource::new(10, 50);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let collector = Collector::new(&source, CollectOptions::default()).with_cancellation(cancel);
    assert_eq!(collector.collect(channel()).count(), 0);
    assert_eq!(source.list_calls.get(), 0);
}

// =========================================================================
// Re-collection against the store
// =========================================================================

#[test]
fn test_recollection_keeps_show_and_episode() {
    let (db, _temp) = setup_test_db();
    let source = FakeSource::new(2, 50);
    Collector::new(&source, CollectOptions::default())
        .collect(channel())
        .sync_into(&db);
    db.update_show_episode("vid001", Some("DOU News"), Some(5)).unwrap();

    Collector::new(&source, CollectOptions::default())
        .collect(channel())
        .sync_into(&db);

    let video = db.get_video("vid001").unwrap().unwrap();
    assert_eq!(video.show.as_deref(), Some("DOU News"));
    assert_eq!(video.episode_num, Some(5));
}

#[test]
fn test_recollection_replaces_traffic_sources() {
    let (db, _temp) = setup_test_db();
    let source = FakeSource::new(1, 50);
    source.set_traffic("vid000", &[("YT_SEARCH", 10), ("EXT_URL", 3)]);
    Collector::new(&source, CollectOptions::default())
        .collect(channel())
        .sync_into(&db);

    source.set_traffic("vid000", &[("SUGGESTED", 40)]);
    Collector::new(&source, CollectOptions::default())
        .collect(channel())
        .sync_into(&db);

    let rows = db.get_traffic_sources("vid000").unwrap();
    assert_eq!(
        rows,
        vec![TrafficSourceRow {
            traffic_source: "SUGGESTED".to_string(),
            views: 40
        }]
    );
}

#[test]
fn test_channel_snapshot_appends() {
    let (db, _temp) = setup_test_db();
    let source = FakeSource::new(3, 50);
    collect_channel_snapshot(&source, &db, "UC_TEST").unwrap();
    collect_channel_snapshot(&source, &db, "UC_TEST").unwrap();

    let history = db.get_channel_history(Some("UC_TEST")).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].video_count, 3);
}
