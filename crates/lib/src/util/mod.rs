//! Shared utilities.
//!
//! Hashing, deterministic archives, filesystem helpers and shared library
//! inspection used across the crate.

pub mod archive;
pub mod fs;
pub mod hash;
pub mod soname;

