pub mod fetcher;
pub mod orchestrator;
pub mod presenter;
pub mod rate_limit;

pub use fetcher::QuotaFetcher;
pub use orchestrator::RefreshOrchestrator;
pub use presenter::{LogSink, PresentationSink, RefreshState};
pub use rate_limit::{CooldownCheck, RateLimiter, MAX_CONCURRENT_FETCHES};
