//! Domain model, configuration loading and logging init shared by the
//! coordinator and the client.
//!
//! # Overview
//!
//! This crate carries the pieces of the system that are not themselves
//! protocol or coordination logic: the [`Location`]/[`LocationRecord`] data
//! model (§3 of the design), the `key = value` configuration file reader used
//! by both the coordinator and the client binaries, and a single
//! `tracing`-based logging entry point.

pub mod config;
pub mod location;
pub mod logging;

pub use config::{ConfigError, Configuration};
pub use location::{Location, LocationRecord};
