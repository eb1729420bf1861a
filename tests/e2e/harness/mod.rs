//! E2E test harness for the bridge.
//!
//! This module contains test infrastructure with builders, variants, and
//! methods that not every scenario uses.

#![allow(dead_code)]

pub mod assertions;
pub mod clock;
pub mod runner;
pub mod scenario;
pub mod steps;
pub mod workspace;

// Re-export commonly used types
pub use assertions::Assertion;
pub use scenario::Scenario;
