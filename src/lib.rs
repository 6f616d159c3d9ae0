//! Library exports for reusing capturecast subsystems.
//!
//! Exposes the capture fan-out pipeline, its built-in sinks and the
//! configuration types so that other front ends can drive captures the same
//! way the command-line tool does.

pub mod capture;
pub mod config;
pub mod notification;

pub use config::Config;
