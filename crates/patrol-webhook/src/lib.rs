//! GitHub webhook receiver for Byte Patrol.
//!
//! Verifies deliveries, routes them with [`dispatch::route_event`] and hands
//! accepted work to a [`server::JobRunner`] on a detached task.

pub mod dispatch;
pub mod events;
pub mod server;
pub mod signature;

pub use dispatch::{route_event, Dispatch, Job, JobKind, RouteSettings};
pub use server::{route_settings, router, serve, AppState, GitHubJobRunner, JobRunner};
