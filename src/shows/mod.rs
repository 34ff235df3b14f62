pub mod mapper;
pub mod patterns;

use serde::Serialize;

pub use mapper::{MappingChange, MappingFailure, MappingOptions, MappingReport, ShowMapper};
pub use patterns::{Pattern, PatternConfig, PatternSet, ShowConfig};

/// Show and episode derived from a title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub show: String,
    pub episode: Option<i64>,
    /// Position of the winning pattern in the configured list.
    pub position: usize,
    /// The episode expression matched but its group was not an integer.
    pub episode_parse_failed: bool,
}

/// First-match-wins: the earliest enabled pattern whose title expression
/// matches decides the result, regardless of how specific later ones are.
pub fn classify(title: &str, patterns: &[Pattern]) -> Option<Classification> {
    for pattern in patterns.iter().filter(|p| p.enabled) {
        let Some(caps) = pattern.title.captures(title) else {
            continue;
        };

        // A show group that took part in the match names the show, even when
        // it captured nothing; an empty name sends us on to the next pattern.
        let show = match pattern.show_group.and_then(|group| caps.get(group)) {
            Some(m) => m.as_str().trim(),
            None => pattern.name.trim(),
        };
        if show.is_empty() {
            continue;
        }

        let (episode, episode_parse_failed) = extract_episode(title, pattern);

        return Some(Classification {
            show: show.to_string(),
            episode,
            position: pattern.position,
            episode_parse_failed,
        });
    }
    None
}

fn extract_episode(title: &str, pattern: &Pattern) -> (Option<i64>, bool) {
    let Some(caps) = pattern.episode.as_ref().and_then(|re| re.captures(title)) else {
        return (None, false);
    };
    let Some(m) = caps.get(pattern.episode_group) else {
        return (None, false);
    };

    match m.as_str().trim().parse::<i64>() {
        Ok(n) => (Some(n), false),
        Err(_) => {
            log::debug!(
                "Pattern '{}' captured non-numeric episode '{}' in '{}'",
                pattern.name,
                m.as_str(),
                title
            );
            (None, true)
        }
    }
}
