//! Per-folder synchronization cursor.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sentinel meaning "uninitialized, needs a full resync".
pub const INITIAL_CURSOR: &str = "0";

/// Opaque, server-issued position in a folder's change stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncCursor(String);

impl SyncCursor {
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        if token.is_empty() {
            Self::initial()
        } else {
            Self(token)
        }
    }

    pub fn initial() -> Self {
        Self(INITIAL_CURSOR.to_string())
    }

    pub fn is_initial(&self) -> bool {
        self.0 == INITIAL_CURSOR
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SyncCursor {
    fn default() -> Self {
        Self::initial()
    }
}

impl fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_cursor() {
        assert!(SyncCursor::initial().is_initial());
        assert!(SyncCursor::default().is_initial());
        assert!(SyncCursor::new("").is_initial());
        assert!(!SyncCursor::new("abc").is_initial());
        assert_eq!(SyncCursor::new("abc").to_string(), "abc");
    }
}
