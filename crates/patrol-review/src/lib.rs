//! Review engine for Byte Patrol.
//!
//! Parses `@byte-patrol` commands, builds bounded review requests from pull
//! request diffs, calls the LLM with timeouts and retries, renders the
//! answer as Markdown and posts it through a [`github::PullRequestHost`].

pub mod command;
pub mod format;
pub mod github;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod request;
pub mod retry;
