//! Core library for the optoplate controller.
//!
//! optoplate drives a well-plate illumination device over a line-oriented
//! serial command link: it defines timed illumination protocols, binds
//! them to wells, persists and merges definitions across sessions, and
//! runs timed experiments that periodically sample device temperature
//! into an append-only CSV log.
//!
//! The library is used by the interactive console binary; any other front
//! end can drive the same components.

pub mod codec;
pub mod config;
pub mod error;
pub mod link;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod store;

pub use config::Settings;
pub use error::{AppResult, PlateError};
pub use link::{DeviceLink, LinkHandle, MockLink};
pub use protocol::{Color, Protocol, WellAssignment};
pub use registry::AssignmentRegistry;
pub use session::{ExperimentSession, ExperimentState};
pub use store::{LoadResult, PersistenceStore, SaveReport};

#[cfg(feature = "instrument_serial")]
pub use link::SerialLink;
