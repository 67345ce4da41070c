use std::path::Path;

use crate::config::schema::{SyncSettings, MAX_WINDOW_SECS};
use crate::error::ConfigError;

/// Environment variable naming the settings file.
pub const CONFIG_ENV_VAR: &str = "MAILSYNC_CONFIG";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SyncSettings, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<SyncSettings, ConfigError> {
    let settings: SyncSettings = serde_json::from_str(content)?;

    validate_settings(&settings)?;

    Ok(settings)
}

/// Loads the file named by `MAILSYNC_CONFIG`, or defaults when it is unset.
pub fn load_config_from_env() -> Result<SyncSettings, ConfigError> {
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(path) if !path.is_empty() => load_config(path),
        _ => Ok(SyncSettings::default()),
    }
}

pub fn validate_settings(settings: &SyncSettings) -> Result<(), ConfigError> {
    if settings.window_size == 0 {
        return Err(invalid("window_size must be greater than 0"));
    }

    for (name, budget) in [
        ("incremental", &settings.incremental),
        ("full_resync", &settings.full_resync),
    ] {
        if budget.max_iterations == 0 {
            return Err(invalid(format!("{}.max_iterations must be greater than 0", name)));
        }
        if budget.max_duration_secs == 0 {
            return Err(invalid(format!("{}.max_duration_secs must be greater than 0", name)));
        }
    }

    if settings.stuck_cursor_threshold < 2 {
        return Err(invalid("stuck_cursor_threshold must be at least 2"));
    }

    if settings.request_timeout_secs == 0 {
        return Err(invalid("request_timeout_secs must be greater than 0"));
    }

    if settings.retry.max_delay_ms < settings.retry.base_delay_ms {
        return Err(invalid("retry.max_delay_ms must not be smaller than retry.base_delay_ms"));
    }

    let replacement = settings.matching.replacement_window_secs;
    if replacement > MAX_WINDOW_SECS {
        return Err(invalid(format!(
            "matching.replacement_window_secs must not exceed {}",
            MAX_WINDOW_SECS
        )));
    }
    if settings.guard.edit_window_secs > replacement
        || settings.guard.confirmation_window_secs > replacement
    {
        return Err(invalid(
            "guard windows must not exceed matching.replacement_window_secs",
        ));
    }

    if settings.matching.duplicate_window_secs > replacement {
        return Err(invalid(
            "matching.duplicate_window_secs must not exceed matching.replacement_window_secs",
        ));
    }

    if settings.tombstones.ceiling == 0 {
        return Err(invalid("tombstones.ceiling must be greater than 0"));
    }

    if settings.pending_restore.ttl_secs == 0 {
        return Err(invalid("pending_restore.ttl_secs must be greater than 0"));
    }

    if settings.pending_restore.max_entries == 0 {
        return Err(invalid("pending_restore.max_entries must be greater than 0"));
    }

    if settings.gate.wait_ms > 0 && settings.gate.poll_interval_ms == 0 {
        return Err(invalid("gate.poll_interval_ms must be greater than 0 when gate.wait_ms is set"));
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}
