//! Remediation controller for one platform-hosted service.
//!
//! vigil watches a single service's memory through the platform API
//! and restarts it when remediation is warranted: when a scheduled
//! check finds memory at or above the configured ceiling, when a
//! forced-restart interval elapses, or when the platform pushes a
//! memory alert. Every remote call shares one failure guard, and every
//! trigger firing is recorded in a bounded event log served over HTTP.

pub mod config;
pub mod controller;
pub mod events;
pub mod monitor;
pub mod platform;
pub mod restart;
pub mod server;
pub mod webhook;
