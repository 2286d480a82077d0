//! # Orchestrator Testing Utils
//!
//! Shared testing utilities for the config orchestration workspace.
//!
//! - **Mock Repositories**: in-memory task batch and config instance stores
//! - **Mock Ports**: a scripted remote executor, content repository, renderer and identity
//! - **Test Data Builders**: processes, template revisions and batches with sensible defaults
//!
//! Add this crate as a dev-dependency:
//!
//! ```toml
//! [dev-dependencies]
//! orchestrator-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
