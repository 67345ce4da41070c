pub mod loader;
pub mod schema;

pub use loader::{
    load_config, load_config_from_env, load_config_from_str, validate_settings, CONFIG_ENV_VAR,
};
pub use schema::{
    GateSettings, GuardSettings, LoopBudget, MatchingSettings, PendingRestoreSettings,
    RetrySettings, SyncSettings, TombstoneSettings, MAX_WINDOW_SECS,
};
