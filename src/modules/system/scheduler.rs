use std::sync::Arc;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tracing::{info, warn};

use crate::models::AppConfig;
use crate::modules::system::config::load_app_config;
use crate::monitor::orchestrator::RefreshOrchestrator;

/// Startup refresh waits this long so the host finishes coming up first.
const STARTUP_REFRESH_DELAY: Duration = Duration::from_secs(10);

fn refresh_jitter_bounds() -> (u64, u64) {
    let min = std::env::var("QUOTAWATCH_REFRESH_JITTER_MIN_SECONDS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    let max = std::env::var("QUOTAWATCH_REFRESH_JITTER_MAX_SECONDS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    if min <= max {
        (min, max)
    } else {
        (max, min)
    }
}

/// Spawns the periodic auto-refresh loop. Config is re-read every cycle so
/// interval and enablement changes apply without a restart. The returned
/// handle is aborted on shutdown.
pub fn start_auto_refresh(orchestrator: Arc<RefreshOrchestrator>) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Auto-refresh scheduler started");
        let (jitter_min, jitter_max) = refresh_jitter_bounds();

        loop {
            let interval_minutes = match load_app_config() {
                Ok(config) => {
                    let effective = config.effective_auto_refresh_interval_minutes();
                    if config.auto_refresh_interval_minutes < effective {
                        warn!(
                            "auto_refresh_interval_minutes={} is below the minimum, using {}",
                            config.auto_refresh_interval_minutes, effective
                        );
                    }
                    effective
                }
                Err(e) => {
                    warn!("Failed to load config for scheduler: {}", e);
                    AppConfig::default().effective_auto_refresh_interval_minutes()
                }
            };
            time::sleep(Duration::from_secs(interval_minutes * 60)).await;

            let Ok(config) = load_app_config() else {
                continue;
            };
            if !config.auto_refresh {
                continue;
            }

            let jitter_secs = if jitter_max == 0 {
                0
            } else {
                rand::thread_rng().gen_range(jitter_min..=jitter_max)
            };
            if jitter_secs > 0 {
                info!("Applying refresh jitter before run: {}s", jitter_secs);
                time::sleep(Duration::from_secs(jitter_secs)).await;
            }

            info!("Auto-refresh triggered");
            orchestrator.refresh_all(true).await;
        }
    })
}

/// One delayed refresh shortly after startup, when enabled and at least one
/// account is tracked.
pub fn start_startup_refresh(orchestrator: Arc<RefreshOrchestrator>) -> JoinHandle<()> {
    tokio::spawn(async move {
        time::sleep(STARTUP_REFRESH_DELAY).await;

        let refresh_on_startup = load_app_config()
            .map(|c| c.refresh_on_startup)
            .unwrap_or(true);
        if !refresh_on_startup {
            return;
        }
        if orchestrator.tracked_accounts().is_empty() {
            info!("Startup refresh skipped: no tracked accounts");
            return;
        }
        info!("Startup refresh triggered");
        orchestrator.refresh_all(false).await;
    })
}
