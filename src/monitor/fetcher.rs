use std::sync::Arc;

use tracing::{info, warn};

use crate::constants;
use crate::models::quota::plan_display_name;
use crate::models::{AuthenticatedAccount, QuotaErrorKind, QuotaRecord, UserInfoResponse};
use crate::monitor::rate_limit::RateLimiter;

/// Converts one authenticated account into a `QuotaRecord` via exactly one
/// upstream call, under rate-limiter admission. Fetches never error: every
/// outcome is a record, failures carrying an error classification.
pub struct QuotaFetcher {
    client: reqwest::Client,
    rate_limiter: Arc<RateLimiter>,
    api_url: String,
}

impl QuotaFetcher {
    pub fn new(rate_limiter: Arc<RateLimiter>) -> Self {
        Self::with_api_url(rate_limiter, constants::USAGE_API_URL.to_string())
    }

    pub fn with_api_url(rate_limiter: Arc<RateLimiter>, api_url: String) -> Self {
        Self {
            client: crate::utils::http::get_client(),
            rate_limiter,
            api_url,
        }
    }

    pub async fn fetch_quota(&self, account: &AuthenticatedAccount) -> QuotaRecord {
        info!("Fetching quota for {}...", account.label);
        // Held for the whole exchange; dropped on every exit path.
        let _slot = self.rate_limiter.acquire_slot().await;

        let response = match self
            .client
            .get(&self.api_url)
            .bearer_auth(&account.access_token)
            .header(constants::API_VERSION_HEADER, constants::API_VERSION)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Network error for {}: {}", account.label, e);
                return QuotaRecord::failure(account, QuotaErrorKind::Network, "Network error");
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!("HTTP {} for {}", status.as_u16(), account.label);
            return classify_http_error(account, status.as_u16());
        }

        match response.json::<UserInfoResponse>().await {
            Ok(json) => {
                info!(
                    "Success for {}: plan={}",
                    account.label,
                    json.copilot_plan.as_deref().unwrap_or("none")
                );
                parse_user_info(account, json)
            }
            Err(e) => {
                warn!("Failed to read response body for {}: {}", account.label, e);
                QuotaRecord::failure(account, QuotaErrorKind::Network, "Network error")
            }
        }
    }

    /// Fan-out over all accounts, bounded by the shared slot pool. One
    /// record per input account; a single account's failure never aborts
    /// the others.
    pub async fn fetch_all_quotas(&self, accounts: &[AuthenticatedAccount]) -> Vec<QuotaRecord> {
        futures::future::join_all(accounts.iter().map(|account| self.fetch_quota(account))).await
    }
}

fn classify_http_error(account: &AuthenticatedAccount, status: u16) -> QuotaRecord {
    let (kind, message) = match status {
        401 | 403 => (QuotaErrorKind::Auth, "Authentication failed".to_string()),
        429 => (QuotaErrorKind::RateLimit, "Rate limited".to_string()),
        404 => (
            QuotaErrorKind::ApiChanged,
            "API endpoint not found".to_string(),
        ),
        _ => (QuotaErrorKind::Unknown, format!("HTTP {}", status)),
    };
    QuotaRecord::failure(account, kind, message)
}

fn parse_user_info(account: &AuthenticatedAccount, json: UserInfoResponse) -> QuotaRecord {
    let premium = json
        .quota_snapshots
        .as_ref()
        .and_then(|snapshots| snapshots.premium_interactions.as_ref());

    if let Some(snapshot) = premium {
        return QuotaRecord::from_premium_snapshot(
            account,
            json.copilot_plan.clone().unwrap_or_default(),
            json.quota_reset_date.clone().unwrap_or_default(),
            snapshot,
        );
    }

    match json.copilot_plan.as_deref() {
        None | Some("") => QuotaRecord::failure(account, QuotaErrorKind::NoPlan, "No Copilot plan"),
        Some(plan) => {
            // A plan without a premium snapshot is a free tier: worth
            // showing, but it carries no measurable premium allotment.
            let mut record = QuotaRecord::failure(
                account,
                QuotaErrorKind::FreePlan,
                format!("{} -- No premium quota", plan_display_name(Some(plan))),
            );
            record.plan = plan.to_string();
            record.reset_date = json.quota_reset_date.unwrap_or_default();
            record
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Account;
    use crate::monitor::rate_limit::MAX_CONCURRENT_FETCHES;
    use axum::http::StatusCode;
    use axum::{routing::get, Json, Router};
    use serde_json::json;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn account(id: &str) -> AuthenticatedAccount {
        AuthenticatedAccount::new(
            &Account::new(id.to_string(), format!("user-{}", id)),
            "token".to_string(),
        )
    }

    fn limiter() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(
            Duration::from_secs(60),
            Duration::from_secs(120),
        ))
    }

    async fn serve(app: Router) -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener local addr");
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve test app");
        });
        (format!("http://{}/user", addr), server)
    }

    #[tokio::test(flavor = "current_thread")]
    async fn success_response_yields_usage_record() {
        let app = Router::new().route(
            "/user",
            get(|| async {
                Json(json!({
                    "copilot_plan": "individual",
                    "quota_snapshots": {
                        "premium_interactions": {
                            "entitlement": 300,
                            "percent_remaining": 63.333,
                            "overage_permitted": true,
                            "overage_count": 2
                        }
                    },
                    "quota_reset_date": "2026-09-01"
                }))
            }),
        );
        let (url, server) = serve(app).await;

        let fetcher = QuotaFetcher::with_api_url(limiter(), url);
        let record = fetcher.fetch_quota(&account("1")).await;
        server.abort();

        assert!(record.error.is_none());
        assert_eq!(record.plan, "individual");
        assert_eq!(record.entitlement, 300);
        assert_eq!(record.used, 110);
        assert_eq!(record.percent_used, 36.7);
        assert!(record.overage_permitted);
        assert_eq!(record.overage_count, 2);
        assert_eq!(record.reset_date, "2026-09-01");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn plan_without_premium_snapshot_is_free_plan() {
        let app = Router::new().route(
            "/user",
            get(|| async { Json(json!({"copilot_plan": "business"})) }),
        );
        let (url, server) = serve(app).await;

        let fetcher = QuotaFetcher::with_api_url(limiter(), url);
        let record = fetcher.fetch_quota(&account("1")).await;
        server.abort();

        assert_eq!(record.error_type, Some(QuotaErrorKind::FreePlan));
        assert_eq!(
            record.error.as_deref(),
            Some("Copilot Business -- No premium quota")
        );
        assert_eq!(record.plan, "business");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn missing_plan_is_no_plan() {
        let app = Router::new().route("/user", get(|| async { Json(json!({})) }));
        let (url, server) = serve(app).await;

        let fetcher = QuotaFetcher::with_api_url(limiter(), url);
        let record = fetcher.fetch_quota(&account("1")).await;
        server.abort();

        assert_eq!(record.error_type, Some(QuotaErrorKind::NoPlan));
        assert_eq!(record.error.as_deref(), Some("No Copilot plan"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn http_statuses_classify_into_error_kinds() {
        for (status, kind, message) in [
            (StatusCode::UNAUTHORIZED, QuotaErrorKind::Auth, "Authentication failed"),
            (StatusCode::FORBIDDEN, QuotaErrorKind::Auth, "Authentication failed"),
            (StatusCode::TOO_MANY_REQUESTS, QuotaErrorKind::RateLimit, "Rate limited"),
            (StatusCode::NOT_FOUND, QuotaErrorKind::ApiChanged, "API endpoint not found"),
            (StatusCode::INTERNAL_SERVER_ERROR, QuotaErrorKind::Unknown, "HTTP 500"),
        ] {
            let app = Router::new().route("/user", get(move || async move { status }));
            let (url, server) = serve(app).await;

            let fetcher = QuotaFetcher::with_api_url(limiter(), url);
            let record = fetcher.fetch_quota(&account("1")).await;
            server.abort();

            assert_eq!(record.error_type, Some(kind), "status {}", status);
            assert_eq!(record.error.as_deref(), Some(message), "status {}", status);
            assert_eq!(record.entitlement, 0);
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn transport_failure_is_a_network_error() {
        // Nothing listens on discard; the connection is refused.
        let fetcher =
            QuotaFetcher::with_api_url(limiter(), "http://127.0.0.1:9/user".to_string());
        let record = fetcher.fetch_quota(&account("1")).await;

        assert_eq!(record.error_type, Some(QuotaErrorKind::Network));
        assert_eq!(record.error.as_deref(), Some("Network error"));
        assert!(record.fetched_at > 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn slot_is_released_on_every_exit_path() {
        let rate_limiter = limiter();

        let app = Router::new()
            .route("/user", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }));
        let (url, server) = serve(app).await;
        let fetcher = QuotaFetcher::with_api_url(rate_limiter.clone(), url);
        fetcher.fetch_quota(&account("1")).await;
        server.abort();
        assert_eq!(rate_limiter.available_slots(), MAX_CONCURRENT_FETCHES);

        let fetcher = QuotaFetcher::with_api_url(
            rate_limiter.clone(),
            "http://127.0.0.1:9/user".to_string(),
        );
        fetcher.fetch_quota(&account("1")).await;
        assert_eq!(rate_limiter.available_slots(), MAX_CONCURRENT_FETCHES);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn fetch_all_returns_one_record_per_account() {
        let app = Router::new().route(
            "/user",
            get(|| async {
                Json(json!({
                    "copilot_plan": "individual",
                    "quota_snapshots": {
                        "premium_interactions": {
                            "entitlement": 100,
                            "percent_remaining": 50.0
                        }
                    }
                }))
            }),
        );
        let (url, server) = serve(app).await;

        let fetcher = QuotaFetcher::with_api_url(limiter(), url);
        let accounts: Vec<AuthenticatedAccount> =
            (0..7).map(|i| account(&i.to_string())).collect();
        let records = fetcher.fetch_all_quotas(&accounts).await;
        server.abort();

        assert_eq!(records.len(), accounts.len());
        for account in &accounts {
            assert!(records.iter().any(|r| r.account_id == account.id));
        }
    }
}
