//! Core types, configuration, and error handling for Byte Patrol.
//!
//! This crate provides the shared foundation used by all other Byte Patrol crates:
//! - [`PatrolError`]: unified error type using `thiserror`, with typed
//!   [`CommandError`] and [`ProviderError`] payloads
//! - [`PatrolConfig`]: configuration loaded from `.byte-patrol.toml` and the environment
//! - Shared types: [`ReviewCommand`], [`DiffContext`], [`FileChange`], [`Hunk`],
//!   [`PrIdentifier`], [`ReviewResult`]

mod config;
mod error;
mod types;

pub use config::{
    GitHubConfig, LlmConfig, PatrolConfig, ReviewConfig, ServerConfig, UnknownFlagPolicy,
};
pub use error::{CommandError, ErrorClass, PatrolError, ProviderError, ProviderKind};
pub use types::{
    DiffContext, FileChange, FileStatus, Hunk, LineRange, PrIdentifier, ReviewCommand,
    ReviewFeedback, ReviewResult, ReviewStyle, Truncation,
};

/// A convenience `Result` type for Byte Patrol operations.
pub type Result<T> = std::result::Result<T, PatrolError>;
