//! Admission control logic and per-client window state.

mod client;
mod controller;
mod policy;
mod store;
mod window;

pub use client::ClientKey;
pub use controller::{AdmissionController, Decision, DenyReason};
pub use policy::{PolicyRegistry, RateLimitPolicy};
pub use store::{EvaluationError, WindowCounts, WindowStore};
pub use window::WindowTracker;
