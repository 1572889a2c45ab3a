//! Common utilities and types shared across the meeting mesh crates.

#![warn(clippy::pedantic)]

/// Module for identifiers and roster data
pub mod types;

/// Module for common configuration
pub mod config;

/// Module for secret types that prevent accidental logging
pub mod secret;
