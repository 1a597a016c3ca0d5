//! Shared test utilities for atlas-import integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated sessions with temp directories
//! - Builders for zip, tar and gzip fixtures
//! - A scripted importer for driving the verifier deterministically

pub mod builders;
pub mod fakes;
pub mod harness;

pub use builders::*;
pub use fakes::*;
pub use harness::{TestHarness, WAIT};
