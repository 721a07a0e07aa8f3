//! Shared test utilities for enricher integration tests.
//!
//! This module provides:
//! - document builders (PDF, DOCX) for realistic blobs
//! - in-memory collaborators (object store, model, metadata store)
//! - `Harness`, which wires a pipeline and worker pool around them

pub mod builders;
pub mod fakes;
pub mod harness;

pub use builders::*;
pub use fakes::*;
pub use harness::{until_terminal, until_terminal_within, Harness, DEFAULT_ANSWER};
