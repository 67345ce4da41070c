use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Engine settings. Every field has a default, so `{}` is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Maximum number of changes requested per batch.
    #[serde(default = "default_window_size")]
    pub window_size: u32,
    #[serde(default = "default_true")]
    pub include_full_content: bool,
    #[serde(default = "LoopBudget::incremental")]
    pub incremental: LoopBudget,
    #[serde(default = "LoopBudget::full_resync")]
    pub full_resync: LoopBudget,
    /// Consecutive responses with an unchanged cursor before the loop stops.
    #[serde(default = "default_stuck_cursor_threshold")]
    pub stuck_cursor_threshold: u32,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Pause after a mutating call before the next cursor-dependent request.
    #[serde(default = "default_server_settle_delay_ms")]
    pub server_settle_delay_ms: u64,
    #[serde(default)]
    pub guard: GuardSettings,
    #[serde(default)]
    pub matching: MatchingSettings,
    #[serde(default)]
    pub tombstones: TombstoneSettings,
    #[serde(default)]
    pub pending_restore: PendingRestoreSettings,
    #[serde(default)]
    pub gate: GateSettings,
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

fn default_window_size() -> u32 {
    50
}

fn default_true() -> bool {
    true
}

fn default_stuck_cursor_threshold() -> u32 {
    3
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_server_settle_delay_ms() -> u64 {
    1500
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            include_full_content: true,
            incremental: LoopBudget::incremental(),
            full_resync: LoopBudget::full_resync(),
            stuck_cursor_threshold: default_stuck_cursor_threshold(),
            retry: RetrySettings::default(),
            request_timeout_secs: default_request_timeout_secs(),
            server_settle_delay_ms: default_server_settle_delay_ms(),
            guard: GuardSettings::default(),
            matching: MatchingSettings::default(),
            tombstones: TombstoneSettings::default(),
            pending_restore: PendingRestoreSettings::default(),
            gate: GateSettings::default(),
            database_path: None,
        }
    }
}

impl SyncSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn server_settle_delay(&self) -> Duration {
        Duration::from_millis(self.server_settle_delay_ms)
    }
}

/// Hard caps on one synchronization loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopBudget {
    pub max_iterations: u32,
    pub max_duration_secs: u64,
}

impl LoopBudget {
    pub fn incremental() -> Self {
        Self {
            max_iterations: 25,
            max_duration_secs: 120,
        }
    }

    pub fn full_resync() -> Self {
        Self {
            max_iterations: 200,
            max_duration_secs: 600,
        }
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Upper bound of the guard and matching windows, in seconds.
pub const MAX_WINDOW_SECS: u64 = 86_400;

/// Settings that skipped validation are clamped instead of overflowing.
fn window(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(secs.min(MAX_WINDOW_SECS) as i64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardSettings {
    /// Protection after an ordinary UI edit.
    #[serde(default = "default_edit_window_secs")]
    pub edit_window_secs: u64,
    /// Protection after an explicit delete/update awaiting confirmation.
    #[serde(default = "default_confirmation_window_secs")]
    pub confirmation_window_secs: u64,
}

fn default_edit_window_secs() -> u64 {
    5
}

fn default_confirmation_window_secs() -> u64 {
    30
}

impl GuardSettings {
    pub fn edit_window(&self) -> chrono::Duration {
        window(self.edit_window_secs)
    }

    pub fn confirmation_window(&self) -> chrono::Duration {
        window(self.confirmation_window_secs)
    }
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            edit_window_secs: default_edit_window_secs(),
            confirmation_window_secs: default_confirmation_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchingSettings {
    /// Time proximity for content-based duplicate detection.
    #[serde(default = "default_duplicate_window_secs")]
    pub duplicate_window_secs: u64,
    /// Time proximity for replacement, cross-generation and restore matching.
    #[serde(default = "default_replacement_window_secs")]
    pub replacement_window_secs: u64,
}

fn default_duplicate_window_secs() -> u64 {
    5
}

fn default_replacement_window_secs() -> u64 {
    300
}

impl MatchingSettings {
    pub fn duplicate_window(&self) -> chrono::Duration {
        window(self.duplicate_window_secs)
    }

    pub fn replacement_window(&self) -> chrono::Duration {
        window(self.replacement_window_secs)
    }
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self {
            duplicate_window_secs: default_duplicate_window_secs(),
            replacement_window_secs: default_replacement_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TombstoneSettings {
    #[serde(default = "default_tombstone_ceiling")]
    pub ceiling: usize,
}

fn default_tombstone_ceiling() -> usize {
    500
}

impl Default for TombstoneSettings {
    fn default() -> Self {
        Self {
            ceiling: default_tombstone_ceiling(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRestoreSettings {
    #[serde(default = "default_restore_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_restore_max_entries")]
    pub max_entries: u64,
}

fn default_restore_ttl_secs() -> u64 {
    3600
}

fn default_restore_max_entries() -> u64 {
    1000
}

impl Default for PendingRestoreSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_restore_ttl_secs(),
            max_entries: default_restore_max_entries(),
        }
    }
}

impl PendingRestoreSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateSettings {
    /// How long a caller waits for a busy folder; 0 fails immediately.
    #[serde(default)]
    pub wait_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    100
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            wait_ms: 0,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl GateSettings {
    pub fn wait(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_uses_defaults() {
        let settings: SyncSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, SyncSettings::default());
        assert_eq!(settings.window_size, 50);
        assert_eq!(settings.guard.edit_window_secs, 5);
        assert_eq!(settings.guard.confirmation_window_secs, 30);
        assert_eq!(settings.matching.replacement_window_secs, 300);
        assert_eq!(settings.pending_restore.ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn test_partial_group_keeps_other_defaults() {
        let settings: SyncSettings =
            serde_json::from_str(r#"{"retry": {"max_retries": 5}}"#).unwrap();
        assert_eq!(settings.retry.max_retries, 5);
        assert_eq!(settings.retry.base_delay_ms, 2000);
    }

    #[test]
    fn test_windows_are_clamped() {
        let matching = MatchingSettings {
            duplicate_window_secs: 5,
            replacement_window_secs: 10_000_000_000_000_000,
        };
        assert_eq!(matching.duplicate_window(), chrono::Duration::seconds(5));
        assert_eq!(
            matching.replacement_window(),
            chrono::Duration::seconds(MAX_WINDOW_SECS as i64)
        );

        let guard = GuardSettings {
            edit_window_secs: u64::MAX,
            confirmation_window_secs: 30,
        };
        assert_eq!(guard.edit_window(), chrono::Duration::days(1));
        assert_eq!(guard.confirmation_window(), chrono::Duration::seconds(30));
    }
}
