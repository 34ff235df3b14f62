use super::{classify, PatternSet, ShowConfig};
use crate::database::{Database, VideoFilter};
use crate::error::{AppError, PatternError};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// The `options` block of the pattern file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingOptions {
    /// Only consider videos with no show and no episode yet.
    pub update_only_empty: bool,
    /// Process at most this many candidates; 0 means unlimited.
    pub max_videos: usize,
    pub dry_run: bool,
    /// Itemize before/after values for every matched video.
    pub verbose: bool,
}

impl Default for MappingOptions {
    fn default() -> Self {
        Self {
            update_only_empty: true,
            max_videos: 0,
            dry_run: false,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingChange {
    pub video_id: String,
    pub title: String,
    pub before_show: Option<String>,
    pub before_episode: Option<i64>,
    pub after_show: String,
    pub after_episode: Option<i64>,
    /// False for dry runs and failed writes.
    pub applied: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MappingFailure {
    pub video_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MappingReport {
    pub run_id: Uuid,
    pub dry_run: bool,
    pub candidates: usize,
    pub processed: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub updated: usize,
    pub episodes_mapped: usize,
    pub episode_failures: usize,
    pub skipped_due_to_cap: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub invalid_patterns: Vec<PatternError>,
    pub changes: Vec<MappingChange>,
    pub failures: Vec<MappingFailure>,
}

/// Applies a pattern set to stored videos and writes back show/episode.
pub struct ShowMapper {
    patterns: PatternSet,
    options: MappingOptions,
    cancel: CancellationToken,
}

impl ShowMapper {
    pub fn new(patterns: PatternSet, options: MappingOptions) -> Self {
        Self {
            patterns,
            options,
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_config(config: &ShowConfig) -> Self {
        Self::new(PatternSet::compile(&config.show_patterns), config.options.clone())
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn patterns(&self) -> &PatternSet {
        &self.patterns
    }

    pub fn options(&self) -> &MappingOptions {
        &self.options
    }

    /// Classify every candidate video in upload order.
    ///
    /// Only listing the candidates can fail the run; a failed write for one
    /// video is counted and the remaining videos are still processed.
    pub fn run(&self, db: &Database) -> Result<MappingReport, AppError> {
        let options = &self.options;
        let mut report = MappingReport {
            run_id: Uuid::new_v4(),
            dry_run: options.dry_run,
            candidates: 0,
            processed: 0,
            matched: 0,
            unmatched: 0,
            updated: 0,
            episodes_mapped: 0,
            episode_failures: 0,
            skipped_due_to_cap: 0,
            failed: 0,
            cancelled: false,
            invalid_patterns: self.patterns.invalid.clone(),
            changes: Vec::new(),
            failures: Vec::new(),
        };
        let span = tracing::info_span!("show_mapping", run_id = %report.run_id);
        let _guard = span.enter();

        let candidates = db.list_videos(&VideoFilter {
            unmapped_only: options.update_only_empty,
            include_excluded: false,
            ..Default::default()
        })?;
        report.candidates = candidates.len();

        let cap = if options.max_videos > 0 {
            options.max_videos
        } else {
            usize::MAX
        };

        log::info!(
            "Mapping {} videos with {} patterns{}",
            candidates.len().min(cap),
            self.patterns.enabled_count(),
            if options.dry_run { " (dry run)" } else { "" }
        );

        for (i, video) in candidates.iter().enumerate() {
            if self.cancel.is_cancelled() {
                log::info!("Show mapping cancelled after {} videos", report.processed);
                report.cancelled = true;
                break;
            }
            if i >= cap {
                report.skipped_due_to_cap = candidates.len() - cap;
                break;
            }
            report.processed += 1;

            let Some(result) = classify(&video.title, &self.patterns.patterns) else {
                report.unmatched += 1;
                if options.verbose {
                    log::info!("[{}/{}] No match: {}", i + 1, candidates.len(), video.title);
                }
                continue;
            };

            report.matched += 1;
            if result.episode.is_some() {
                report.episodes_mapped += 1;
            }
            if result.episode_parse_failed {
                report.episode_failures += 1;
            }

            let mut change = MappingChange {
                video_id: video.video_id.clone(),
                title: video.title.clone(),
                before_show: video.show.clone(),
                before_episode: video.episode_num,
                after_show: result.show,
                after_episode: result.episode,
                applied: false,
            };

            if !options.dry_run {
                match db.update_show_episode(
                    &change.video_id,
                    Some(&change.after_show),
                    change.after_episode,
                ) {
                    Ok(()) => {
                        report.updated += 1;
                        change.applied = true;
                    }
                    Err(e) => {
                        log::error!("Failed to map video {}: {}", change.video_id, e);
                        report.failed += 1;
                        report.failures.push(MappingFailure {
                            video_id: change.video_id.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            }

            if options.verbose {
                log::info!(
                    "[{}/{}] {}Mapped: {}{} ({})",
                    i + 1,
                    candidates.len(),
                    if options.dry_run { "[DRY RUN] " } else { "" },
                    change.after_show,
                    change
                        .after_episode
                        .map(|n| format!(" (Episode {})", n))
                        .unwrap_or_default(),
                    change.title
                );
            }
            if options.verbose || options.dry_run {
                report.changes.push(change);
            }
        }

        log::info!(
            "Show mapping {} finished: {} matched, {} unmatched, {} updated, {} failed, {} skipped by cap",
            report.run_id,
            report.matched,
            report.unmatched,
            report.updated,
            report.failed,
            report.skipped_due_to_cap
        );

        Ok(report)
    }
}
