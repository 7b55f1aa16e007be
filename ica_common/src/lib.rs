//! ICA Common Library
//!
//! Shared types for the instrument-control dispatch workspace: the command
//! and acknowledgment model, correlation references, operational state
//! enums with their permission bitset, the structured event sink, the error
//! taxonomy and TOML configuration loading.
//!
//! # Module Structure
//!
//! - [`command`] - Command variants, names, timeouts
//! - [`ack`] - Acknowledgments
//! - [`reference`] - Correlation references and channel ids
//! - [`state`] - Operation/availability states and `StatePermissions`
//! - [`event`] - Structured events and sinks
//! - [`error`] - Error taxonomy
//! - [`config`] - Configuration loading traits and types
//! - [`prelude`] - Common re-exports for convenience

pub mod ack;
pub mod command;
pub mod config;
pub mod consts;
pub mod error;
pub mod event;
pub mod prelude;
pub mod reference;
pub mod state;
