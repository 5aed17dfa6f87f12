//! Cache Module
//!
//! Synchronous building blocks of the engine: entries, the entry table with
//! its access index, the eviction policy and statistics.

mod entry;
mod eviction;
mod lru;
mod stats;
mod table;


// Re-export public types
pub use entry::{
    approximate_size, current_timestamp_ms, into_refresh_fn, CacheEntry, RefreshFn, Refresher,
};
pub(crate) use entry::duration_ms;
pub use eviction::EvictionPolicy;
pub use lru::LruTracker;
pub use stats::CacheStats;
pub use table::EntryTable;

use crate::error::{CacheError, Result};

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;

// == Key Validation ==
/// Accepts non-empty keys without control characters, up to `MAX_KEY_LENGTH` bytes.
pub fn validate_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(CacheError::InvalidArgument("Key cannot be empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(CacheError::InvalidArgument(format!(
            "Key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    if key.chars().any(char::is_control) {
        return Err(CacheError::InvalidArgument(
            "Key cannot contain control characters".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("user:42").is_ok());
        assert!(matches!(validate_key(""), Err(CacheError::InvalidArgument(_))));
        assert!(matches!(validate_key("   "), Err(CacheError::InvalidArgument(_))));
        assert!(matches!(validate_key("a\nb"), Err(CacheError::InvalidArgument(_))));
        assert!(validate_key(&"x".repeat(MAX_KEY_LENGTH)).is_ok());
        assert!(validate_key(&"x".repeat(MAX_KEY_LENGTH + 1)).is_err());
    }
}
