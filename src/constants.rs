use std::sync::LazyLock;

/// Copilot user-info endpoint carrying the premium-interactions snapshot.
pub const USAGE_API_URL: &str = "https://api.github.com/copilot_internal/user";

/// The endpoint rejects requests without a versioned API header.
pub const API_VERSION_HEADER: &str = "X-GitHub-Api-Version";
pub const API_VERSION: &str = "2025-05-01";

pub static USER_AGENT: LazyLock<String> = LazyLock::new(|| {
    format!(
        "quotawatch/{} {}/{}",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_carries_crate_version() {
        assert!(USER_AGENT.starts_with("quotawatch/"));
        assert!(USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
