//! Shared concurrency substrate
//!
//! Rate limiting for LLM calls, aggregate token accounting, and the
//! in-process per-path file lock used by write tools.

mod file_lock;
mod rate_limiter;
mod tokens;

pub use file_lock::{FileLockRegistry, LockInfo};
pub use rate_limiter::{RATE_WINDOW, RateLimiter};
pub use tokens::{TokenAccountant, TokenTotals};
