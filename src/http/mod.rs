//! HTTP surface: admission middleware and server assembly.

mod middleware;
mod server;

pub use middleware::{admission_middleware, AdmissionState, AuthenticatedUser};
pub use server::{router, HttpServer};
