pub mod constants;
pub mod error;
pub mod models;
pub mod modules;
pub mod monitor;
pub mod utils;

#[cfg(test)]
mod test_utils;

use std::sync::Arc;

use tracing::{error, info};

use modules::account::{CredentialProvider, FileCredentialProvider};
use modules::persistence::{FileQuotaStore, QuotaStore};
use modules::system::{logger, scheduler};
use monitor::presenter::{LogSink, PresentationSink};
use monitor::{QuotaFetcher, RateLimiter, RefreshOrchestrator};

/// A running monitor: the orchestrator plus its scheduler tasks.
pub struct MonitorHandles {
    pub orchestrator: Arc<RefreshOrchestrator>,
    auto_refresh: tokio::task::JoinHandle<()>,
    startup_refresh: tokio::task::JoinHandle<()>,
}

impl MonitorHandles {
    pub fn shutdown(&self) {
        self.auto_refresh.abort();
        self.startup_refresh.abort();
        self.orchestrator.shutdown();
    }
}

async fn start_monitor_runtime() -> Result<MonitorHandles, String> {
    let config = modules::system::config::load_app_config()
        .map_err(|e| format!("failed_to_load_config: {}", e))?;

    let rate_limiter = Arc::new(RateLimiter::from_config(&config));
    let fetcher = QuotaFetcher::new(rate_limiter.clone());
    let store: Arc<dyn QuotaStore> =
        Arc::new(FileQuotaStore::new().map_err(|e| format!("failed_to_open_quota_store: {}", e))?);
    let credentials: Arc<dyn CredentialProvider> = Arc::new(
        FileCredentialProvider::new().map_err(|e| format!("failed_to_open_credentials: {}", e))?,
    );
    let sink: Arc<dyn PresentationSink> = Arc::new(LogSink);

    let orchestrator = Arc::new(RefreshOrchestrator::new(
        rate_limiter,
        fetcher,
        store,
        credentials,
        sink,
    ));
    orchestrator.load_cached().await;

    let auto_refresh = scheduler::start_auto_refresh(orchestrator.clone());
    let startup_refresh = scheduler::start_startup_refresh(orchestrator.clone());
    info!(
        "Monitor started with {} tracked account(s)",
        orchestrator.tracked_accounts().len()
    );

    Ok(MonitorHandles {
        orchestrator,
        auto_refresh,
        startup_refresh,
    })
}

pub fn run() {
    logger::init_logger();

    let runtime = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");
    runtime.block_on(async {
        match start_monitor_runtime().await {
            Ok(handles) => {
                info!("quotawatch is running. Press Ctrl+C to exit.");
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutting down quotawatch");
                handles.shutdown();
            }
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        }
    });
}
