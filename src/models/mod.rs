//! Data models for the Monster Tracker.
//!
//! These models match the frontend TypeScript interfaces for seamless interoperability.

mod flavor;
mod log;
mod snapshot;

pub use flavor::*;
pub use log::*;
pub use snapshot::*;
