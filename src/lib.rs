pub mod collector;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod shows;

pub use collector::{
    collect_channel_snapshot, CollectOptions, Collection, CollectionReport, Collector, ListTarget,
    RemoteSource,
};
pub use config::AppConfig;
pub use database::Database;
pub use error::{AppError, CollectError, PatternError};
pub use logging::init_logging;
pub use shows::{classify, MappingOptions, MappingReport, PatternSet, ShowConfig, ShowMapper};
