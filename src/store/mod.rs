//! Window storage.
//!
//! A [`Store`] hands out per-key exclusive access to window state. The rate
//! limiter acquires a key, runs the bucket algorithm, and releases the key,
//! optionally writing the updated window back.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::ratelimit::Window;

mod memory;

pub use memory::{MemoryStore, DEFAULT_SWEEP_INTERVAL};

/// Window state handed out by [`Store::acquire`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lease {
    /// Copy of the stored window; empty for new or expired keys
    pub window: Window,
    /// Whole seconds left before the stored state expires
    pub ttl_secs: u64,
}

/// Trait for window storage backends.
///
/// Implementations must serialize `acquire`..`release` pairs for the same key
/// and must not make distinct keys wait on each other.
#[async_trait]
pub trait Store: Send + Sync {
    /// Take exclusive access to `key` and return its current window.
    ///
    /// Waits until no other caller holds `key`. A new or expired key yields an
    /// empty window.
    async fn acquire(&self, key: &str) -> Result<Lease, StoreError>;

    /// Give up exclusive access to `key`.
    ///
    /// With `Some(window)` the window is stored and expires `ttl_secs` from now.
    /// With `None` the stored state and expiry are left as they were and
    /// `ttl_secs` is ignored. Fails with [`StoreError::NotAcquired`] if `key`
    /// is not currently held.
    async fn release(
        &self,
        key: &str,
        window: Option<Window>,
        ttl_secs: u64,
    ) -> Result<(), StoreError>;
}
