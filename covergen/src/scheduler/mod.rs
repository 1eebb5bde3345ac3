//! Scheduling primitives.
//!
//! Background maintenance runs on a generic periodic trigger that knows
//! nothing about what it triggers.

mod periodic;

pub use periodic::{PeriodicTask, spawn_periodic};
