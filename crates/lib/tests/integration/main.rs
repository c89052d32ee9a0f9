//! Integration tests for binforge-lib, driven through the public API.

mod common;

mod build_tests;
mod source_tests;
