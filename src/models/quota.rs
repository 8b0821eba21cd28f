use serde::{Deserialize, Serialize};

use super::account::AuthenticatedAccount;

/// Classification of a failed or informational fetch outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QuotaErrorKind {
    Auth,
    Network,
    RateLimit,
    NoPlan,
    FreePlan,
    ApiChanged,
    Unknown,
}

/// One account's latest known usage snapshot.
///
/// Exactly one of {usage fields, error + error_type} is the useful payload:
/// a record with `error` set still occupies a display/cache slot but is
/// excluded from best-account aggregation and sorted after healthy records.
/// Superseded wholesale on every subsequent fetch for the same account id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaRecord {
    pub account_id: String,
    pub account_label: String,
    pub plan: String,
    pub entitlement: u32,
    pub percent_remaining: f64,
    pub percent_used: f64,
    pub used: u32,
    pub overage_permitted: bool,
    pub overage_count: u32,
    pub reset_date: String,
    /// Unix seconds of the fetch that produced this record.
    pub fetched_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<QuotaErrorKind>,
}

impl QuotaRecord {
    /// A record carrying an error classification instead of usage data.
    /// All numeric fields are zeroed; `fetched_at` is still stamped.
    pub fn failure(
        account: &AuthenticatedAccount,
        kind: QuotaErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            account_id: account.id.clone(),
            account_label: account.label.clone(),
            plan: String::new(),
            entitlement: 0,
            percent_remaining: 0.0,
            percent_used: 0.0,
            used: 0,
            overage_permitted: false,
            overage_count: 0,
            reset_date: String::new(),
            fetched_at: chrono::Utc::now().timestamp(),
            error: Some(message.into()),
            error_type: Some(kind),
        }
    }

    /// A record derived from a premium-interactions snapshot.
    ///
    /// `used` is the absolute consumed count, floored at zero before
    /// rounding; `percent_used` is rounded to one decimal.
    pub fn from_premium_snapshot(
        account: &AuthenticatedAccount,
        plan: String,
        reset_date: String,
        snapshot: &PremiumInteractions,
    ) -> Self {
        let entitlement = snapshot.entitlement;
        let percent_remaining = snapshot.percent_remaining;
        let used = (entitlement as f64 * (1.0 - percent_remaining / 100.0)).max(0.0);
        let percent_used = ((100.0 - percent_remaining) * 10.0).round() / 10.0;

        Self {
            account_id: account.id.clone(),
            account_label: account.label.clone(),
            plan,
            entitlement,
            percent_remaining,
            percent_used,
            used: used.round() as u32,
            overage_permitted: snapshot.overage_permitted,
            overage_count: snapshot.overage_count,
            reset_date,
            fetched_at: chrono::Utc::now().timestamp(),
            error: None,
            error_type: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Stale records are emphasized by the presentation layer only; they
    /// never gate refreshes.
    pub fn is_stale(&self, stale_threshold_minutes: u64, now: i64) -> bool {
        now.saturating_sub(self.fetched_at) > (stale_threshold_minutes * 60) as i64
    }
}

/// Maps upstream plan codes to their display names.
pub fn plan_display_name(plan: Option<&str>) -> &'static str {
    match plan {
        Some("individual") => "Copilot Pro",
        Some("individual_pro") => "Copilot Pro+",
        Some("business") => "Copilot Business",
        Some("enterprise") => "Copilot Enterprise",
        _ => "Copilot Free",
    }
}

/// Upstream user-info payload, mirrored field-for-field.
#[derive(Debug, Clone, Deserialize)]
pub struct UserInfoResponse {
    #[serde(default)]
    pub copilot_plan: Option<String>,
    #[serde(default)]
    pub quota_snapshots: Option<QuotaSnapshots>,
    #[serde(default)]
    pub quota_reset_date: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuotaSnapshots {
    #[serde(default)]
    pub premium_interactions: Option<PremiumInteractions>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PremiumInteractions {
    pub entitlement: u32,
    pub percent_remaining: f64,
    #[serde(default)]
    pub overage_permitted: bool,
    #[serde(default)]
    pub overage_count: u32,
}
