pub mod clock;
pub mod config;
pub mod error;
pub mod grpc;
pub mod mqtt;
pub mod retention;
pub mod rollup;
pub mod stats;
pub mod store;
pub mod telemetry;

pub use error::{RollupError, RollupResult};
pub use rollup::RollupEngine;
