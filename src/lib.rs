//! Slidegate - Approximate Sliding-Window Rate Limiting
//!
//! This crate answers, for an arbitrary string key, whether the next event for
//! that key fits a (window, limit) policy. Counts are kept in a bounded number
//! of time buckets per key, and per-key state lives in a pluggable [`Store`]
//! that serializes concurrent access to the same key.
//!
//! ```no_run
//! # async fn demo() -> slidegate::error::Result<()> {
//! use std::sync::Arc;
//! use slidegate::{MemoryStore, RateLimiter};
//!
//! let store = Arc::new(MemoryStore::new(60, std::future::pending::<()>()));
//! let limiter = RateLimiter::new(60, 6, 100, store)?;
//!
//! if limiter.attempt("client-42").await? {
//!     // handle the request
//! }
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;

pub use ratelimit::{Policy, RateLimiter, Window};
pub use store::{MemoryStore, Store};
