pub mod config;
pub mod telemetry;
pub mod types;

pub use config::Config;
pub use types::*;
