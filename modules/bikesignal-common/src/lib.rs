//! Domain types, scoring primitives and configuration shared by every
//! bikesignal crate. No I/O.

pub mod config;
pub mod error;
pub mod events;
pub mod geo;
pub mod types;

pub use config::EngineConfig;
pub use error::{ParseEnumError, SignalError, SignalResult};
pub use events::ReportEvent;
pub use geo::GeoBounds;
pub use types::*;
