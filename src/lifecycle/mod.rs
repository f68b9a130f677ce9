//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Context::new(kind)
//!     → spawns one driver task (single-threaded cooperative scheduling)
//!     → execute()/spawn() submit work that runs on that driver
//!     → Context::current() resolves inside submitted work
//!
//! Context::close()
//!     → run registered close hooks (clients close themselves)
//!     → broadcast shutdown → driver exits
//! ```
//!
//! # Design Decisions
//! - Affinity is an explicit handle captured at acquisition time, not thread identity
//! - Close hooks give deterministic teardown; drop is only a safety net

pub mod context;

pub use context::{Context, ContextId, ContextKind, HookId};
