//! cutover-core: shared vocabulary for the blue-green rollout controller.
//!
//! Holds the domain types every other crate speaks (colors, environments,
//! verdicts, switch records, alert signals), the `cutover.toml` schema,
//! and the duration strings used throughout the config.

pub mod config;
pub mod duration;
pub mod types;

pub use config::{ConfigError, ConfigResult, CutoverConfig};
pub use duration::parse_duration;
pub use types::*;
