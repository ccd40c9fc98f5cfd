//! Count limits and builder configuration.
//!
//! [`Limits`] fixes, once per [`LargeCount`](crate::LargeCount), where the
//! native path ends and how oversized counts are decomposed. The defaults
//! match a runtime whose primitives take a 32-bit signed count.
//!
//! # Environment Variables
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `LARGECOUNT_SIZE_CHECK` | `0`, `false`, `off` or `no` disable the byte-size consistency check |

use std::env;

use crate::error::{Error, Result};

/// Largest count the native primitives accept (`INT_MAX`).
pub const NATIVE_MAX_COUNT: i64 = i32::MAX as i64;

/// Environment variable read by [`Limits::from_env`].
pub const SIZE_CHECK_ENV: &str = "LARGECOUNT_SIZE_CHECK";

/// Thresholds and switches for composite datatype construction.
///
/// # Example
///
/// ```
/// use largecount::Limits;
///
/// let limits = Limits::default().with_size_check(false);
/// assert_eq!(limits.threshold, i32::MAX as i64);
/// assert!(limits.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Largest count passed straight to the native primitive (inclusive).
    pub threshold: i64,
    /// Elements per block of the chunk sub-layout.
    pub max_block: i64,
    /// Query the committed composite's size and compare it with
    /// `count * element size`.
    pub verify_size: bool,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            threshold: NATIVE_MAX_COUNT,
            max_block: NATIVE_MAX_COUNT,
            verify_size: true,
        }
    }
}

impl Limits {
    /// Default limits with the size check taken from `LARGECOUNT_SIZE_CHECK`.
    pub fn from_env() -> Self {
        let verify_size = env::var(SIZE_CHECK_ENV)
            .ok()
            .and_then(|s| parse_switch(&s))
            .unwrap_or(true);
        Limits {
            verify_size,
            ..Limits::default()
        }
    }

    /// Set the pass-through threshold.
    pub fn with_threshold(mut self, threshold: i64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the chunk block length.
    pub fn with_max_block(mut self, max_block: i64) -> Self {
        self.max_block = max_block;
        self
    }

    /// Enable or disable the byte-size consistency check.
    pub fn with_size_check(mut self, verify_size: bool) -> Self {
        self.verify_size = verify_size;
        self
    }

    /// Check `1 <= max_block <= threshold <= i32::MAX`.
    ///
    /// A block no larger than the threshold guarantees at least one chunk for
    /// every count that leaves the native path, and both values must fit the
    /// native count type.
    pub fn validate(&self) -> Result<()> {
        if self.threshold > NATIVE_MAX_COUNT {
            return Err(Error::InvalidConfig(format!(
                "threshold {} exceeds the native count range",
                self.threshold
            )));
        }
        if self.max_block < 1 || self.max_block > self.threshold {
            return Err(Error::InvalidConfig(format!(
                "max_block {} must be in 1..={}",
                self.max_block, self.threshold
            )));
        }
        Ok(())
    }
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_native_count_range() {
        let limits = Limits::default();
        assert_eq!(limits.threshold, 2_147_483_647);
        assert_eq!(limits.max_block, 2_147_483_647);
        assert!(limits.verify_size);
        assert!(limits.validate().is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range() {
        let too_big = Limits::default().with_threshold(1 << 31);
        assert!(matches!(too_big.validate(), Err(Error::InvalidConfig(_))));

        let zero_block = Limits::default().with_max_block(0);
        assert!(zero_block.validate().is_err());

        let block_over_threshold = Limits::default().with_threshold(8).with_max_block(9);
        let err = block_over_threshold.validate().unwrap_err();
        assert!(err.to_string().contains("max_block 9"), "got: {err}");

        let small = Limits::default().with_threshold(8).with_max_block(7);
        assert!(small.validate().is_ok());
    }

    #[test]
    fn parse_switch_values() {
        assert_eq!(parse_switch("0"), Some(false));
        assert_eq!(parse_switch(" OFF "), Some(false));
        assert_eq!(parse_switch("yes"), Some(true));
        assert_eq!(parse_switch("maybe"), None);
    }

    /// Env mutations live in one test; `set_var`/`remove_var` race with
    /// other tests touching the same variable.
    #[test]
    fn size_check_env_var() {
        unsafe {
            std::env::set_var(SIZE_CHECK_ENV, "false");
        }
        assert!(!Limits::from_env().verify_size);

        unsafe {
            std::env::set_var(SIZE_CHECK_ENV, "garbage");
        }
        assert!(Limits::from_env().verify_size);

        unsafe {
            std::env::remove_var(SIZE_CHECK_ENV);
        }
        let limits = Limits::from_env();
        assert!(limits.verify_size);
        assert_eq!(limits.threshold, NATIVE_MAX_COUNT);
    }
}
