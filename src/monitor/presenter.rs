use std::cmp::Ordering;

use tracing::info;

use crate::models::{QuotaErrorKind, QuotaRecord, SetupAccountInfo};

/// Per-scope refresh lifecycle as seen by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Loading,
    Done,
    Error,
    /// Refresh denied by throttling; not an error.
    Cooldown,
    /// No tracked/authenticated accounts; not an error.
    NeedsSetup,
}

pub fn refresh_state_name(state: RefreshState) -> &'static str {
    match state {
        RefreshState::Loading => "loading",
        RefreshState::Done => "done",
        RefreshState::Error => "error",
        RefreshState::Cooldown => "cooldown",
        RefreshState::NeedsSetup => "needsSetup",
    }
}

/// Push notifications toward a UI. Fire-and-forget: the core never awaits
/// acknowledgment and a sink must not block.
pub trait PresentationSink: Send + Sync {
    fn on_quota_update(
        &self,
        records: &[QuotaRecord],
        last_refresh_display: &str,
        stale_threshold_minutes: u64,
    );
    fn on_account_refresh_state(
        &self,
        account_id: &str,
        state: RefreshState,
        cooldown_remaining: Option<u64>,
    );
    fn on_refresh_all_state(&self, state: RefreshState, cooldown_remaining: Option<u64>);
    fn on_setup_data(&self, accounts: &[SetupAccountInfo]);
    fn on_auth_result(&self, account_id: &str, success: bool);
}

fn sorts_last(record: &QuotaRecord) -> bool {
    record.error_type == Some(QuotaErrorKind::FreePlan) || record.is_error()
}

/// Display ordering: free-plan and errored records after all others,
/// each group by descending remaining percentage.
pub fn sorted_for_display(records: &[QuotaRecord]) -> Vec<QuotaRecord> {
    let mut sorted = records.to_vec();
    sorted.sort_by(|a, b| match sorts_last(a).cmp(&sorts_last(b)) {
        Ordering::Equal => b
            .percent_remaining
            .partial_cmp(&a.percent_remaining)
            .unwrap_or(Ordering::Equal),
        unequal => unequal,
    });
    sorted
}

/// Severity bands for the status display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaLevel {
    Normal,
    Warning,
    Critical,
}

impl QuotaLevel {
    fn for_percent_remaining(percent: f64) -> Self {
        if percent > 50.0 {
            Self::Normal
        } else if percent >= 20.0 {
            Self::Warning
        } else {
            Self::Critical
        }
    }
}

/// Condensed one-line view of the whole account set.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusSummary {
    /// No records at all.
    NeedsSetup,
    /// Records exist but every one carries an error.
    Error,
    Quota {
        /// Best account's remaining percentage, floored at 0 and rounded
        /// to one decimal.
        percent_remaining: f64,
        account_label: String,
        level: QuotaLevel,
        account_count: usize,
    },
}

/// The account with the most remaining quota; errored records never win.
pub fn best_account(records: &[QuotaRecord]) -> Option<&QuotaRecord> {
    records
        .iter()
        .filter(|record| !record.is_error())
        .fold(None, |best: Option<&QuotaRecord>, record| match best {
            Some(current) if record.percent_remaining <= current.percent_remaining => Some(current),
            _ => Some(record),
        })
}

pub fn status_summary(records: &[QuotaRecord]) -> StatusSummary {
    let valid_count = records.iter().filter(|r| !r.is_error()).count();
    match best_account(records) {
        Some(best) => StatusSummary::Quota {
            percent_remaining: (best.percent_remaining.max(0.0) * 10.0).round() / 10.0,
            account_label: best.account_label.clone(),
            level: QuotaLevel::for_percent_remaining(best.percent_remaining),
            account_count: valid_count,
        },
        None if records.is_empty() => StatusSummary::NeedsSetup,
        None => StatusSummary::Error,
    }
}

/// Sink for headless runs: every notification becomes a log line.
pub struct LogSink;

impl PresentationSink for LogSink {
    fn on_quota_update(
        &self,
        records: &[QuotaRecord],
        last_refresh_display: &str,
        _stale_threshold_minutes: u64,
    ) {
        match status_summary(records) {
            StatusSummary::Quota {
                percent_remaining,
                account_label,
                account_count,
                ..
            } => info!(
                "Quota update: {}% remaining -- {} (best of {} account(s)), last refresh {}",
                percent_remaining, account_label, account_count, last_refresh_display
            ),
            StatusSummary::Error => info!("Quota update: all accounts in error state"),
            StatusSummary::NeedsSetup => info!("Quota update: no accounts tracked"),
        }
    }

    fn on_account_refresh_state(
        &self,
        account_id: &str,
        state: RefreshState,
        cooldown_remaining: Option<u64>,
    ) {
        match cooldown_remaining {
            Some(wait) => info!(
                "Account {} refresh state: {} ({}s remaining)",
                account_id,
                refresh_state_name(state),
                wait
            ),
            None => info!(
                "Account {} refresh state: {}",
                account_id,
                refresh_state_name(state)
            ),
        }
    }

    fn on_refresh_all_state(&self, state: RefreshState, cooldown_remaining: Option<u64>) {
        match cooldown_remaining {
            Some(wait) => info!(
                "Refresh-all state: {} ({}s remaining)",
                refresh_state_name(state),
                wait
            ),
            None => info!("Refresh-all state: {}", refresh_state_name(state)),
        }
    }

    fn on_setup_data(&self, accounts: &[SetupAccountInfo]) {
        info!("Setup data: {} discovered account(s)", accounts.len());
    }

    fn on_auth_result(&self, account_id: &str, success: bool) {
        info!("Auth result for {}: success={}", account_id, success);
    }
}
