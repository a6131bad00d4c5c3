//! Rate limiting logic and window state.

mod limiter;
mod policy;
mod window;

pub use limiter::RateLimiter;
pub use policy::Policy;
pub use window::{Outcome, Window};
