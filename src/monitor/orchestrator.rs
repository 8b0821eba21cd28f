use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::TimeZone;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::error::AppResult;
use crate::models::{Account, AuthenticatedAccount, QuotaRecord, SetupAccountInfo};
use crate::modules::account::CredentialProvider;
use crate::modules::persistence::QuotaStore;
use crate::modules::system::config::load_app_config;
use crate::monitor::fetcher::QuotaFetcher;
use crate::monitor::presenter::{self, PresentationSink, RefreshState};
use crate::monitor::rate_limit::RateLimiter;

/// Credential-change notifications are coalesced over this window before
/// triggering a refresh.
const SESSION_CHANGE_DEBOUNCE: Duration = Duration::from_secs(2);

/// Top-level refresh policy: decides when refreshes are allowed, drives the
/// fetcher for one or all tracked accounts, owns the in-memory quota table,
/// and fans results out to the store and the presentation sink.
///
/// Constructed once at startup and shared by handle; the quota table and
/// cooldown clocks live here, never in ambient global state. Collaborator
/// faults are caught at this boundary, logged with account context, and
/// surfaced as signaled states; they never propagate and never leave the
/// table partially mutated.
pub struct RefreshOrchestrator {
    rate_limiter: Arc<RateLimiter>,
    fetcher: QuotaFetcher,
    store: Arc<dyn QuotaStore>,
    credentials: Arc<dyn CredentialProvider>,
    sink: Arc<dyn PresentationSink>,
    quotas: RwLock<Vec<QuotaRecord>>,
    last_refresh: AtomicI64,
    session_refresh: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RefreshOrchestrator {
    pub fn new(
        rate_limiter: Arc<RateLimiter>,
        fetcher: QuotaFetcher,
        store: Arc<dyn QuotaStore>,
        credentials: Arc<dyn CredentialProvider>,
        sink: Arc<dyn PresentationSink>,
    ) -> Self {
        Self {
            rate_limiter,
            fetcher,
            store,
            credentials,
            sink,
            quotas: RwLock::new(Vec::new()),
            last_refresh: AtomicI64::new(0),
            session_refresh: Mutex::new(None),
        }
    }

    /// Hydrates the in-memory table from the store so cached data is
    /// presented before any network activity.
    pub async fn load_cached(&self) {
        match self.store.load_all_quotas() {
            Ok(records) if !records.is_empty() => {
                let count = records.len();
                *self.quotas.write().await = records;
                let last = self.store.load_last_refresh().unwrap_or_else(|e| {
                    warn!("Failed to load last refresh time: {}", e);
                    0
                });
                self.last_refresh.store(last, Ordering::Relaxed);
                info!("Loaded {} cached account record(s)", count);
                self.push_current_view().await;
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to load cached quotas: {}", e),
        }
    }

    pub async fn refresh_single(&self, account_id: &str) {
        self.sync_cooldowns_from_config();
        let check = self.rate_limiter.can_refresh(account_id);
        if !check.allowed {
            info!(
                "Account {} on cooldown ({}s remaining)",
                account_id, check.wait_seconds
            );
            self.sink.on_account_refresh_state(
                account_id,
                RefreshState::Cooldown,
                Some(check.wait_seconds),
            );
            return;
        }

        self.sink
            .on_account_refresh_state(account_id, RefreshState::Loading, None);

        let label = self
            .quotas
            .read()
            .await
            .iter()
            .find(|q| q.account_id == account_id)
            .map(|q| q.account_label.clone())
            .unwrap_or_else(|| account_id.to_string());
        let account = Account::new(account_id.to_string(), label);

        let Some(session) = self.credentials.get_session(&account, false).await else {
            warn!("No session available for account {}", account_id);
            self.sink
                .on_account_refresh_state(account_id, RefreshState::Error, None);
            return;
        };

        let record = self
            .fetcher
            .fetch_quota(&AuthenticatedAccount::new(&account, session.access_token))
            .await;
        self.rate_limiter.record_refresh(account_id);

        if let Err(e) = self.commit_records(std::slice::from_ref(&record)).await {
            error!("Failed to persist quota for {}: {}", account_id, e);
            self.sink
                .on_account_refresh_state(account_id, RefreshState::Error, None);
            return;
        }

        self.push_current_view().await;
        self.sink
            .on_account_refresh_state(account_id, RefreshState::Done, None);
    }

    pub async fn refresh_all(&self, bypass_cooldown: bool) {
        self.sync_cooldowns_from_config();
        if !bypass_cooldown {
            let check = self.rate_limiter.can_refresh_all();
            if !check.allowed {
                info!(
                    "Refresh-all on cooldown ({}s remaining)",
                    check.wait_seconds
                );
                self.sink
                    .on_refresh_all_state(RefreshState::Cooldown, Some(check.wait_seconds));
                return;
            }
        }

        self.sink.on_refresh_all_state(RefreshState::Loading, None);

        let tracked = match self.store.load_account_list() {
            Ok(ids) => ids,
            Err(e) => {
                error!("Failed to load tracked account list: {}", e);
                self.sink.on_refresh_all_state(RefreshState::Error, None);
                return;
            }
        };

        let authenticated = self.resolve_authenticated_accounts(&tracked).await;
        if authenticated.is_empty() {
            info!("No authenticated accounts found");
            self.sink
                .on_refresh_all_state(RefreshState::NeedsSetup, None);
            return;
        }

        let results = self.fetcher.fetch_all_quotas(&authenticated).await;
        for record in &results {
            self.rate_limiter.record_refresh(&record.account_id);
        }
        self.rate_limiter.record_refresh_all();

        match self.commit_records(&results).await {
            Ok(()) => {
                info!("Refreshed {} account(s)", results.len());
                self.push_current_view().await;
                self.sink.on_refresh_all_state(RefreshState::Done, None);
            }
            Err(e) => {
                error!("Failed to persist refreshed quotas: {}", e);
                self.sink.on_refresh_all_state(RefreshState::Error, None);
            }
        }
    }

    /// Fresh-authentication path: bypasses the cooldown for the first
    /// post-auth fetch, tracks the account, and leaves the cooldown clock
    /// updated for future throttling.
    pub async fn authenticate_account(&self, account_id: &str) {
        let discovered = self.credentials.discover_accounts().await;
        let Some(account) = discovered.into_iter().find(|a| a.id == account_id) else {
            warn!("Account {} not found among discovered accounts", account_id);
            return;
        };

        let Some(session) = self.credentials.get_session(&account, true).await else {
            info!("Authentication failed or cancelled for {}", account.label);
            self.sink.on_auth_result(&account.id, false);
            return;
        };

        info!("Account {} authenticated, fetching quota...", account.label);
        self.rate_limiter.reset_cooldown(&account.id);
        let record = self
            .fetcher
            .fetch_quota(&AuthenticatedAccount::new(&account, session.access_token))
            .await;
        self.rate_limiter.record_refresh(&account.id);

        if let Err(e) = self.track_account(&account.id) {
            error!("Failed to track account {}: {}", account.id, e);
        }
        self.merge_records(std::slice::from_ref(&record)).await;
        if let Err(e) = self.store.save_quota(&record) {
            error!(
                "Failed to persist quota after auth for {}: {}",
                account.label, e
            );
        }
        self.push_current_view().await;
        self.sink.on_auth_result(&account.id, true);
    }

    /// Deletes the account everywhere (tracked set, store, in-memory
    /// table) without any network call.
    pub async fn remove_account(&self, account_id: &str) {
        if let Err(e) = self.store.remove_account(account_id) {
            error!("Failed to remove account {} from store: {}", account_id, e);
        }
        self.quotas
            .write()
            .await
            .retain(|q| q.account_id != account_id);
        self.push_current_view().await;
        info!("Removed account {}", account_id);
    }

    /// Discovers accounts and reports which tracked ones currently hold a
    /// session, for the setup view.
    pub async fn setup_data(&self) {
        let accounts = self.credentials.discover_accounts().await;
        let tracked = self.store.load_account_list().unwrap_or_else(|e| {
            warn!("Failed to load tracked account list: {}", e);
            Vec::new()
        });

        let mut setup = Vec::new();
        for account in accounts {
            let authenticated = tracked.contains(&account.id)
                && self.credentials.get_session(&account, false).await.is_some();
            let has_quota = self
                .store
                .load_quota(&account.id)
                .ok()
                .flatten()
                .is_some();
            setup.push(SetupAccountInfo {
                id: account.id,
                label: account.label,
                authenticated,
                has_quota,
            });
        }
        self.sink.on_setup_data(&setup);
    }

    /// Setup completion clears every cooldown so the first refresh of the
    /// freshly configured set is never throttled.
    pub async fn finish_setup(&self) {
        self.rate_limiter.reset_all_cooldowns();
        self.refresh_all(false).await;
    }

    /// Debounced credential-change trigger: schedules a refresh after the
    /// debounce window, replacing any previously scheduled one.
    pub fn notify_sessions_changed(self: &Arc<Self>) {
        info!("Credential sessions changed, scheduling refresh...");
        let orchestrator = Arc::clone(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(SESSION_CHANGE_DEBOUNCE).await;
            orchestrator.refresh_all(false).await;
        });
        let mut pending = self
            .session_refresh
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        if let Some(previous) = pending.replace(task) {
            previous.abort();
        }
    }

    /// Cancels any pending debounced refresh.
    pub fn shutdown(&self) {
        if let Some(pending) = self
            .session_refresh
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            pending.abort();
        }
    }

    pub async fn records(&self) -> Vec<QuotaRecord> {
        self.quotas.read().await.clone()
    }

    pub fn last_refresh_timestamp(&self) -> i64 {
        self.last_refresh.load(Ordering::Relaxed)
    }

    pub fn tracked_accounts(&self) -> Vec<String> {
        self.store.load_account_list().unwrap_or_else(|e| {
            warn!("Failed to load tracked account list: {}", e);
            Vec::new()
        })
    }

    async fn resolve_authenticated_accounts(
        &self,
        tracked: &[String],
    ) -> Vec<AuthenticatedAccount> {
        let discovered = self.credentials.discover_accounts().await;
        let discovered_count = discovered.len();

        let mut authenticated = Vec::new();
        for account in discovered {
            if !tracked.contains(&account.id) {
                continue;
            }
            if let Some(session) = self.credentials.get_session(&account, false).await {
                authenticated.push(AuthenticatedAccount::new(&account, session.access_token));
            }
        }
        info!(
            "{}/{} discovered account(s) authenticated",
            authenticated.len(),
            discovered_count
        );
        authenticated
    }

    /// Cooldown durations follow the live config; recorded timestamps are
    /// untouched.
    fn sync_cooldowns_from_config(&self) {
        if let Ok(config) = load_app_config() {
            self.rate_limiter.set_cooldowns(
                Duration::from_secs(config.refresh_cooldown_seconds),
                Duration::from_secs(config.refresh_all_cooldown_seconds),
            );
        }
    }

    fn track_account(&self, account_id: &str) -> AppResult<()> {
        let mut tracked = self.store.load_account_list()?;
        if !tracked.iter().any(|id| id == account_id) {
            tracked.push(account_id.to_string());
            self.store.save_account_list(&tracked)?;
        }
        Ok(())
    }

    /// Replace-by-account-id merge, atomic with respect to concurrent
    /// readers; the whole batch lands under one write lock.
    async fn merge_records(&self, records: &[QuotaRecord]) {
        let mut table = self.quotas.write().await;
        for record in records {
            match table.iter_mut().find(|q| q.account_id == record.account_id) {
                Some(existing) => *existing = record.clone(),
                None => table.push(record.clone()),
            }
        }
    }

    /// Merges into memory, then persists in the same order. A persistence
    /// failure never unwinds the in-memory merge.
    async fn commit_records(&self, records: &[QuotaRecord]) -> AppResult<()> {
        self.merge_records(records).await;
        for record in records {
            self.store.save_quota(record)?;
        }
        let now = chrono::Utc::now().timestamp();
        self.last_refresh.store(now, Ordering::Relaxed);
        self.store.save_last_refresh(now)?;
        Ok(())
    }

    async fn push_current_view(&self) {
        let stale_threshold_minutes = load_app_config()
            .map(|c| c.stale_threshold_minutes)
            .unwrap_or_else(|e| {
                warn!("Failed to load config for view push: {}", e);
                crate::models::AppConfig::default().stale_threshold_minutes
            });

        let records = self.quotas.read().await.clone();
        let sorted = presenter::sorted_for_display(&records);
        let display = format_last_refresh(self.last_refresh.load(Ordering::Relaxed));
        self.sink
            .on_quota_update(&sorted, &display, stale_threshold_minutes);
    }
}

fn format_last_refresh(timestamp: i64) -> String {
    if timestamp == 0 {
        return "--".to_string();
    }
    match chrono::Local.timestamp_opt(timestamp, 0).single() {
        Some(at) => at.format("%H:%M").to_string(),
        None => "--".to_string(),
    }
}
