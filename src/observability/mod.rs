//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatch, acquisition, redirect and upgrade paths produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, histograms via the metrics facade)
//!
//! Consumers:
//!     → whatever subscriber / recorder the embedding application installs
//! ```
//!
//! # Design Decisions
//! - Request ID is attached to every exchange log event
//! - Facade calls are no-ops without a recorder
//! - The library never installs a global subscriber on its own

pub mod logging;
pub mod metrics;
