//! Wiring of ingestion, dispatch, and shutdown into one long-running service.
//!
//! ## Structure
//!
//! - [`handler`] - Service entry point (`DispatchService`).

pub mod handler;
