//! HTTP primitives shared by the cache and the lifecycle manager.
//!
//! Responses are captured as plain snapshots (`CachedResponse`) so they can be
//! stored, replayed and compared without holding a live connection.

#[cfg(test)]
pub mod fake;
mod fetcher;
mod request;
mod response;

pub use fetcher::{Fetcher, HttpFetcher};
pub use request::Request;
pub use response::{CachedResponse, ResponseKind};
