use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins when set; otherwise
/// `info`, or `debug` for verbose runs. `log` records are forwarded too.
///
/// Returns false if a subscriber was already installed (tests, embedding
/// applications); that is not an error.
pub fn init_logging(verbose: bool) -> bool {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_harmless() {
        init_logging(false);
        assert!(!init_logging(true));
        log::info!("logging initialized");
    }
}
