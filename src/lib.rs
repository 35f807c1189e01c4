//! Screen-guided task assistance.
//!
//! The library watches a screen through a [`sensor::ScreenSensor`], asks a
//! vision model for one instruction at a time through a
//! [`generator::InstructionSource`], and keeps the resulting instruction
//! sequence consistent in a [`session::TaskEngine`]. Completion checks run
//! against before/after frame pairs whenever the screen changes, so steps
//! the user already performed are ticked off without being asked.

pub mod classify;
pub mod config;
pub mod coords;
pub mod frame;
pub mod generator;
pub mod sensor;
pub mod session;
pub mod snapshot;
