pub mod config;
pub mod error;
pub mod event_config;
pub mod types;

pub use config::AnalyticsConfig;
pub use error::{AnalyticsError, AnalyticsResult};
pub use event_config::{merge_event_configuration, EventCatalog, MergeInput};
