//! # Orchestrator Testing Utils
//!
//! Shared testing utilities for the orchestrator workspace: in-memory doubles
//! for every collaborator trait, descriptor builders and polling helpers.
//!
//! ## Usage
//!
//! Add this crate as a dev-dependency:
//!
//! ```toml
//! [dev-dependencies]
//! orchestrator-testing-utils = { path = "../testing-utils" }
//! ```
//!
//! Then use the mocks in your tests:
//!
//! ```rust
//! use orchestrator_testing_utils::{MockHostRuntimeTransport, TaskDescriptorBuilder};
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
