use crate::error::{AppError, PatternError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::mapper::MappingOptions;
use super::{classify, Classification};

/// One entry of `show_patterns` in the pattern file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternConfig {
    pub name: String,
    pub title_regex: String,
    #[serde(default)]
    pub episode_regex: Option<String>,
    #[serde(default = "default_episode_group")]
    pub episode_group: usize,
    /// Take the show name from this capture group of `title_regex`
    /// instead of using `name`.
    #[serde(default)]
    pub show_group: Option<usize>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_episode_group() -> usize {
    1
}

fn default_enabled() -> bool {
    true
}

/// The pattern file: ordered patterns plus mapping options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShowConfig {
    #[serde(default)]
    pub show_patterns: Vec<PatternConfig>,
    #[serde(default)]
    pub options: MappingOptions,
}

impl ShowConfig {
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read pattern file {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, AppError> {
        serde_yaml::from_str(content)
            .map_err(|e| AppError::Config(format!("Invalid YAML in pattern file: {}", e)))
    }
}

/// A compiled show rule. Plain data; order in the slice is significant.
#[derive(Debug, Clone)]
pub struct Pattern {
    pub position: usize,
    pub name: String,
    pub title: Regex,
    pub episode: Option<Regex>,
    pub episode_group: usize,
    pub show_group: Option<usize>,
    pub enabled: bool,
}

impl Pattern {
    pub fn compile(position: usize, config: &PatternConfig) -> Result<Self, PatternError> {
        let error = |field: &'static str, e: regex::Error| PatternError {
            position,
            name: config.name.clone(),
            field,
            message: e.to_string(),
        };

        let title = Regex::new(&config.title_regex).map_err(|e| error("title_regex", e))?;
        let episode = match &config.episode_regex {
            Some(expr) if !expr.is_empty() => {
                Some(Regex::new(expr).map_err(|e| error("episode_regex", e))?)
            }
            _ => None,
        };

        Ok(Self {
            position,
            name: config.name.clone(),
            title,
            episode,
            episode_group: config.episode_group,
            show_group: config.show_group.filter(|&g| g > 0),
            enabled: config.enabled,
        })
    }
}

/// Patterns compiled for one classification run.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    pub patterns: Vec<Pattern>,
    /// Patterns whose expressions did not compile; skipped for this run.
    pub invalid: Vec<PatternError>,
}

impl PatternSet {
    pub fn compile(configs: &[PatternConfig]) -> Self {
        let mut set = Self::default();
        for (position, config) in configs.iter().enumerate() {
            if config.title_regex.is_empty() {
                log::warn!("Pattern '{}' has no title_regex, skipping", config.name);
                continue;
            }
            match Pattern::compile(position, config) {
                Ok(pattern) => set.patterns.push(pattern),
                Err(e) => {
                    log::warn!("Disabling show pattern: {}", e);
                    set.invalid.push(e);
                }
            }
        }
        set
    }

    pub fn enabled_count(&self) -> usize {
        self.patterns.iter().filter(|p| p.enabled).count()
    }

    /// Classify a single title against this set, for checking a pattern
    /// file before running it over the store.
    pub fn test_title(&self, title: &str) -> Option<Classification> {
        classify(title, &self.patterns)
    }

    /// One line per configured pattern, for diagnostics.
    pub fn describe(&self) -> Vec<String> {
        self.patterns
            .iter()
            .map(|p| {
                format!(
                    "{}. {} ({}) title: {} episode: {}",
                    p.position + 1,
                    p.name,
                    if p.enabled { "enabled" } else { "disabled" },
                    p.title.as_str(),
                    p.episode.as_ref().map_or("n/a", |r| r.as_str())
                )
            })
            .chain(self.invalid.iter().map(|e| format!("{} (invalid)", e)))
            .collect()
    }
}
