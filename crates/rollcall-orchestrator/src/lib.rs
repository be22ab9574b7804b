//! Training orchestrator for Rollcall.
//!
//! Decides when a course's classifier must be retrained, versions and
//! registers the result, and computes which devices need it. Also hosts the
//! registry API that edge agents pull from.

pub mod artifacts;
pub mod capability;
pub mod config;
pub mod cron;
pub mod roster;
pub mod train;

pub use config::OrchestratorConfig;
