//! Core types and trait definitions for the Rollcall model registry.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! All other crates depend on it; it depends on nothing proprietary.

pub mod capability;
pub mod device;
pub mod error;
pub mod model;
pub mod registry;
pub mod schedule;

pub use error::{Error, Result};
