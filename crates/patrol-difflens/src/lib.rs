//! Diff parsing and pre-LLM file filtering.
//!
//! Turns the unified diff GitHub returns for a pull request into the ordered
//! [`patrol_core::DiffContext`] the request builder works on, and drops files
//! that only add noise to a review (lock files, vendored and generated code).

pub mod filter;
pub mod parser;
