pub mod normalize;
pub mod source;

#[cfg(test)]
mod tests;

use crate::database::{ChannelSnapshot, Database, TrafficSourceRow, VideoRecord};
use crate::error::{AppError, CollectError};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use normalize::normalize_video;
pub use source::{ListTarget, RawVideo, RemoteSource, VideoPage, DEFAULT_PAGE_SIZE};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectOptions {
    /// Hard ceiling on listed records. `None` or `0` means unlimited.
    pub max_videos: Option<usize>,
    /// Fetch traffic sources and subscriber gains per video.
    pub include_analytics: bool,
    /// Per-call page size; capped by the source's own limit.
    pub page_size: Option<usize>,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            max_videos: None,
            include_analytics: true,
            page_size: None,
        }
    }
}

/// A normalized video ready to be stored.
#[derive(Debug, Clone)]
pub struct CollectedVideo {
    pub record: VideoRecord,
    /// `None` when analytics were skipped or failed; existing rows are kept.
    pub traffic_sources: Option<Vec<TrafficSourceRow>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordFailure {
    pub video_id: String,
    pub error: CollectError,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionReport {
    pub run_id: Uuid,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub analytics_failures: usize,
    pub pages_fetched: usize,
    pub listed: usize,
    pub cancelled: bool,
    /// Set when a listing call failed and the run stopped early.
    pub aborted: Option<String>,
    pub failures: Vec<RecordFailure>,
    pub analytics_errors: Vec<RecordFailure>,
}

impl CollectionReport {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            succeeded: 0,
            failed: 0,
            skipped: 0,
            analytics_failures: 0,
            pages_fetched: 0,
            listed: 0,
            cancelled: false,
            aborted: None,
            failures: Vec::new(),
            analytics_errors: Vec::new(),
        }
    }
}

/// Drives a `RemoteSource` page by page.
pub struct Collector<'a, S: RemoteSource + ?Sized> {
    source: &'a S,
    options: CollectOptions,
    cancel: CancellationToken,
}

impl<'a, S: RemoteSource + ?Sized> Collector<'a, S> {
    pub fn new(source: &'a S, options: CollectOptions) -> Self {
        Self {
            source,
            options,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Start a fresh run over `target`. Nothing is fetched until the
    /// returned iterator is polled.
    pub fn collect(&self, target: ListTarget) -> Collection<'a, S> {
        let page_size = self
            .options
            .page_size
            .unwrap_or(usize::MAX)
            .min(self.source.max_page_size())
            .max(1);

        let mut cap = self.options.max_videos.filter(|&n| n > 0);
        match &target {
            ListTarget::Video(_) => cap = Some(cap.map_or(1, |c| c.min(1))),
            ListTarget::Videos(ids) => cap = Some(cap.map_or(ids.len(), |c| c.min(ids.len()))),
            ListTarget::Channel(_) => {}
        }

        let report = CollectionReport::new();
        let span = tracing::info_span!("collect", run_id = %report.run_id, list = %target);

        Collection {
            source: self.source,
            include_analytics: self.options.include_analytics,
            cancel: self.cancel.clone(),
            target,
            page_size,
            cap,
            buffer: VecDeque::new(),
            next_token: None,
            exhausted: false,
            seen: HashSet::new(),
            report,
            span,
        }
    }
}

/// One collection run. Yields successfully normalized videos in source
/// order; failures are recorded in the report instead.
pub struct Collection<'a, S: RemoteSource + ?Sized> {
    source: &'a S,
    include_analytics: bool,
    cancel: CancellationToken,
    target: ListTarget,
    page_size: usize,
    cap: Option<usize>,
    buffer: VecDeque<RawVideo>,
    next_token: Option<String>,
    exhausted: bool,
    seen: HashSet<String>,
    report: CollectionReport,
    span: tracing::Span,
}

impl<'a, S: RemoteSource + ?Sized> Collection<'a, S> {
    pub fn report(&self) -> &CollectionReport {
        &self.report
    }

    pub fn into_report(self) -> CollectionReport {
        self.report
    }

    /// Reclassify an already-yielded video as failed, e.g. when storing it
    /// did not succeed.
    pub fn mark_failed(&mut self, video_id: &str, error: CollectError) {
        self.report.succeeded = self.report.succeeded.saturating_sub(1);
        self.report.failed += 1;
        self.report.failures.push(RecordFailure {
            video_id: video_id.to_string(),
            error,
        });
    }

    /// Drain the run into the store. Each video and its traffic rows are
    /// written in one transaction; store failures are counted, not raised.
    pub fn sync_into(mut self, db: &Database) -> CollectionReport {
        while let Some(video) = self.next() {
            let video_id = video.record.video_id.clone();
            if let Err(e) = db.save_collected_video(&video.record, video.traffic_sources.as_deref()) {
                log::error!("Failed to store video {}: {}", video_id, e);
                self.mark_failed(&video_id, CollectError::Persistence(e.to_string()));
            }
        }

        let report = self.report;
        log::info!(
            "Collection {} finished: {} stored, {} failed, {} skipped, {} analytics failures",
            report.run_id,
            report.succeeded,
            report.failed,
            report.skipped,
            report.analytics_failures
        );
        report
    }

    fn remaining(&self) -> Option<usize> {
        self.cap.map(|cap| cap.saturating_sub(self.report.listed))
    }

    fn fetch_page(&mut self) {
        let request_size = match self.remaining() {
            Some(0) => {
                self.exhausted = true;
                return;
            }
            Some(remaining) => remaining.min(self.page_size),
            None => self.page_size,
        };

        let previous_token = self.next_token.take();
        let page = match self
            .source
            .list_videos(&self.target, previous_token.as_deref(), request_size)
        {
            Ok(page) => page,
            Err(e) => {
                log::error!("Listing {} failed: {}", self.target, e);
                self.report.aborted = Some(e.to_string());
                self.exhausted = true;
                return;
            }
        };
        self.report.pages_fetched += 1;

        let mut items = page.items;
        if let Some(remaining) = self.remaining() {
            if items.len() >= remaining {
                items.truncate(remaining);
                self.exhausted = true;
            }
        }
        log::debug!(
            "Page {} of {}: {} records",
            self.report.pages_fetched,
            self.target,
            items.len()
        );
        self.report.listed += items.len();
        self.buffer.extend(items);

        match page.next_page_token {
            Some(token) if previous_token.as_deref() == Some(token.as_str()) => {
                log::warn!("Source repeated page token for {}, stopping", self.target);
                self.exhausted = true;
            }
            Some(token) if !self.exhausted => self.next_token = Some(token),
            Some(_) => {}
            None => {
                self.exhausted = true;
                self.count_missing_requested();
            }
        }

        if matches!(self.target, ListTarget::Video(_)) {
            self.exhausted = true;
        }
    }

    /// Explicitly requested ids the source never returned count as skipped.
    fn count_missing_requested(&mut self) {
        let requested: Vec<String> = match &self.target {
            ListTarget::Videos(ids) => ids.clone(),
            ListTarget::Video(id) => vec![id.clone()],
            ListTarget::Channel(_) => return,
        };
        let returned: HashSet<&str> = self
            .seen
            .iter()
            .map(String::as_str)
            .chain(self.buffer.iter().map(|r| r.id.as_str()))
            .collect();
        let missing = requested
            .iter()
            .collect::<HashSet<_>>()
            .into_iter()
            .filter(|id| !returned.contains(id.as_str()))
            .count();
        if missing > 0 {
            log::warn!("{} requested videos were not returned by the source", missing);
            self.report.skipped += missing;
        }
    }

    fn process(&mut self, raw: &RawVideo) -> Result<CollectedVideo, CollectError> {
        let mut record = normalize_video(raw)?;
        let mut traffic_sources = None;

        if self.include_analytics {
            match self.source.fetch_traffic_sources(&record.video_id) {
                Ok(rows) => traffic_sources = Some(rows),
                Err(e) => self.record_analytics_failure(&record.video_id, e),
            }
            match self.source.fetch_subscribers_gained(&record.video_id) {
                Ok(gained) => record.subscribers_gained = gained,
                Err(e) => self.record_analytics_failure(&record.video_id, e),
            }
        }

        Ok(CollectedVideo {
            record,
            traffic_sources,
        })
    }

    fn record_analytics_failure(&mut self, video_id: &str, error: CollectError) {
        log::warn!("Could not get analytics for video {}: {}", video_id, error);
        self.report.analytics_failures += 1;
        self.report.analytics_errors.push(RecordFailure {
            video_id: video_id.to_string(),
            error,
        });
    }
}

impl<'a, S: RemoteSource + ?Sized> Iterator for Collection<'a, S> {
    type Item = CollectedVideo;

    fn next(&mut self) -> Option<Self::Item> {
        let span = self.span.clone();
        let _guard = span.enter();

        loop {
            if self.cancel.is_cancelled() {
                if !self.report.cancelled {
                    log::info!(
                        "Collection cancelled after {} records ({} pending dropped)",
                        self.report.succeeded,
                        self.buffer.len()
                    );
                    self.report.cancelled = true;
                }
                self.buffer.clear();
                self.exhausted = true;
                return None;
            }

            let Some(raw) = self.buffer.pop_front() else {
                if self.exhausted {
                    return None;
                }
                self.fetch_page();
                continue;
            };

            if !self.seen.insert(raw.id.clone()) {
                log::debug!("Skipping duplicate video {}", raw.id);
                self.report.skipped += 1;
                continue;
            }

            match self.process(&raw) {
                Ok(video) => {
                    self.report.succeeded += 1;
                    return Some(video);
                }
                Err(e) => {
                    log::warn!("Could not collect video {}: {}", raw.id, e);
                    self.report.failed += 1;
                    self.report.failures.push(RecordFailure {
                        video_id: raw.id,
                        error: e,
                    });
                }
            }
        }
    }
}

/// Fetch the channel's current totals and append them as a new snapshot.
pub fn collect_channel_snapshot<S: RemoteSource + ?Sized>(
    source: &S,
    db: &Database,
    channel_id: &str,
) -> Result<ChannelSnapshot, AppError> {
    let snapshot = source
        .fetch_channel(channel_id)
        .map_err(|e| AppError::Other(format!("Failed to fetch channel {}: {}", channel_id, e)))?;
    db.append_channel_snapshot(&snapshot)?;
    log::info!(
        "Channel {}: {} subscribers, {} views, {} videos",
        snapshot.channel_id,
        snapshot.subscriber_count,
        snapshot.view_count,
        snapshot.video_count
    );
    Ok(snapshot)
}
