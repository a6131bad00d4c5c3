//! Rate limit policy.

use crate::error::{Error, Result};

/// An immutable (window, bucket, limit) policy.
///
/// The window is split into `bucket_count` buckets of
/// `ceil(window_secs / bucket_count)` seconds each. Smaller buckets make the
/// approximation tighter at the cost of more per-key state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    /// Length of the rolling window in seconds
    window_secs: u64,
    /// Number of buckets the window is divided into
    bucket_count: u64,
    /// Length of one bucket in seconds
    bucket_secs: u64,
    /// Maximum admitted events per rolling window
    limit: u64,
}

impl Policy {
    /// Build a policy, rejecting any zero parameter.
    pub fn new(window_secs: u64, bucket_count: u64, limit: u64) -> Result<Self> {
        if window_secs == 0 {
            return Err(Error::Config("window duration must be greater than zero".into()));
        }
        if bucket_count == 0 {
            return Err(Error::Config("bucket count must be greater than zero".into()));
        }
        if limit == 0 {
            return Err(Error::Config("limit must be greater than zero".into()));
        }

        Ok(Self {
            window_secs,
            bucket_count,
            bucket_secs: window_secs.div_ceil(bucket_count),
            limit,
        })
    }

    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    pub fn bucket_count(&self) -> u64 {
        self.bucket_count
    }

    pub fn bucket_secs(&self) -> u64 {
        self.bucket_secs
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }
}
