#![forbid(unsafe_code)]
//! Boot-environment dataset model public API facade.
//!
//! Re-exports core functionality from `bem-core` through a stable external
//! interface. This is the crate that downstream consumers (CLI, harness)
//! depend on.

pub use bem_core::*;
