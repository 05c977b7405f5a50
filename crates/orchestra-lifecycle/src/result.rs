//! Result type alias for the lifecycle core.
//!
//! ```rust
//! use orchestra_lifecycle::Result;
//!
//! fn load() -> Result<u32> {
//!     Ok(1)
//! }
//! ```

/// Convenience alias for `std::result::Result<T, crate::Error>`.
pub type Result<T, E = crate::Error> = std::result::Result<T, E>;
