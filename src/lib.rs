//! # Dispatch Core
//!
//! A remote-command dispatch fabric for a fleet of agent hosts. A central
//! coordinator accepts commands from authenticated operators, delivers
//! them to named agents via long-polling, and collects results through a
//! per-task rendezvous that unblocks the operator's original request.
//!
//! ## Architecture
//!
//! - **Dispatcher**: glues the task queue, result rendezvous, agent
//!   registry and id allocator into `submit`/`pull`/`complete`, plus
//!   `rename`/`deregister`.
//! - **AuthZ oracle**: a small SQLite-backed store mapping admin session
//!   tokens and agent hwids to identity; the dispatcher never makes policy
//!   decisions beyond "does this credential map to something".
//! - **HTTP surface**: a thin axum shell over the dispatcher and AuthZ
//!   oracle.
//!
//! Task state itself is never persisted: a coordinator restart loses
//! in-flight tasks by design.

/// HTTP API server and endpoints
pub mod api;
/// Request-level identity extraction (admin session, agent hwid)
pub mod auth;
/// AuthZ oracle: persisted admin/agent/session identity store
pub mod authz;
/// System configuration
pub mod config;
/// System-wide constants
pub mod constants;
/// The dispatch fabric core: queue, rendezvous, registry, dispatcher
pub mod dispatch;
/// Error types and handling
pub mod error;
/// Core data models
pub mod models;

pub use error::{DispatchError, Result};
