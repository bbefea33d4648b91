//! Resumable batch remediation engine.
//!
//! Applies idempotent fixes to a large set of remote records behind a
//! rate-limited API, surviving restarts, network failures and throttling.
//!
//! ```text
//! WorkSource ──▶ Orchestrator ──▶ RemediationAction ──▶ RetryExecutor ──▶ RateLimiter
//!                     │                                      │
//!                     ▼                                      ▼
//!               ProgressStore                            RemoteApi
//! ```

pub mod action;
pub mod api;
pub mod config;
pub mod error;
pub mod io;
pub mod orchestrator;
pub mod paths;
pub mod progress;
pub mod rate_limit;
pub mod retry;
pub mod source;

#[cfg(test)]
mod fake;
#[cfg(test)]
mod tests;

pub use error::{RemedyError, Result};
