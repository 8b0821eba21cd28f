use serde::{Deserialize, Serialize};

/// Auto-refresh cadence is never allowed below this, whatever the config says.
pub const MIN_AUTO_REFRESH_INTERVAL_MINUTES: u64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_true")]
    pub auto_refresh: bool,
    #[serde(default = "default_auto_refresh_interval")]
    pub auto_refresh_interval_minutes: u64,
    #[serde(default = "default_refresh_cooldown")]
    pub refresh_cooldown_seconds: u64,
    #[serde(default = "default_refresh_all_cooldown")]
    pub refresh_all_cooldown_seconds: u64,
    #[serde(default = "default_true")]
    pub show_in_status_bar: bool,
    #[serde(default = "default_stale_threshold")]
    pub stale_threshold_minutes: u64,
    #[serde(default = "default_true")]
    pub refresh_on_startup: bool,
}

fn default_true() -> bool {
    true
}

fn default_auto_refresh_interval() -> u64 {
    10
}

fn default_refresh_cooldown() -> u64 {
    60
}

fn default_refresh_all_cooldown() -> u64 {
    120
}

fn default_stale_threshold() -> u64 {
    30
}

impl AppConfig {
    pub fn new() -> Self {
        Self {
            auto_refresh: true,
            auto_refresh_interval_minutes: default_auto_refresh_interval(),
            refresh_cooldown_seconds: default_refresh_cooldown(),
            refresh_all_cooldown_seconds: default_refresh_all_cooldown(),
            show_in_status_bar: true,
            stale_threshold_minutes: default_stale_threshold(),
            refresh_on_startup: true,
        }
    }

    /// Configured interval clamped to the enforced minimum.
    pub fn effective_auto_refresh_interval_minutes(&self) -> u64 {
        self.auto_refresh_interval_minutes
            .max(MIN_AUTO_REFRESH_INTERVAL_MINUTES)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}
