//! Serde models for GitHub Actions workflow files.
//!
//! The models are deliberately lax: anything the analyses in this workspace
//! don't look at (permissions, concurrency, matrices) is dropped during
//! deserialization rather than modeled.

#![deny(missing_docs)]
#![forbid(unsafe_code)]

pub mod common;
pub mod workflow;
