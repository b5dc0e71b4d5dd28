//! # Configuration Module
//!
//! Centralizes every numeric constant the store depends on. Constants that
//! depend on each other live next to each other so a change to one is
//! reviewed against the others.
//!
//! - [`constants`]: numeric configuration values with dependency notes

pub mod constants;
pub use constants::*;
