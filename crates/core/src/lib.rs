//! Shared primitives for the Apollo generation platform.
//!
//! Holds the types every other crate agrees on: timestamps, the
//! domain error enum and the catalogue of generation job kinds.

pub mod error;
pub mod job_kind;
pub mod types;
