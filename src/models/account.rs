use serde::{Deserialize, Serialize};

/// One identity under which usage is measured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub label: String,
}

impl Account {
    pub fn new(id: String, label: String) -> Self {
        Self { id, label }
    }
}

/// An account together with a resolved bearer credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedAccount {
    pub id: String,
    pub label: String,
    pub access_token: String,
}

impl AuthenticatedAccount {
    pub fn new(account: &Account, access_token: String) -> Self {
        Self {
            id: account.id.clone(),
            label: account.label.clone(),
            access_token,
        }
    }
}

/// Per-account state pushed to the presentation sink during setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupAccountInfo {
    pub id: String,
    pub label: String,
    pub authenticated: bool,
    pub has_quota: bool,
}
