use std::fs;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use crate::models::Account;

const CREDENTIALS_FILE: &str = "credentials.json";

/// An opaque bearer credential for one account.
#[derive(Debug, Clone)]
pub struct SessionCredential {
    pub access_token: String,
}

/// Boundary to the identity provider. Implementations must be safe to call
/// repeatedly and never error past this interface: discovery failures
/// surface as an empty list, session failures as `None`.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn discover_accounts(&self) -> Vec<Account>;

    /// Resolves a bearer credential for the account. `create_if_none`
    /// requests an interactive sign-in where the implementation supports
    /// one.
    async fn get_session(&self, account: &Account, create_if_none: bool)
        -> Option<SessionCredential>;
}

#[derive(Debug, Clone, Deserialize)]
struct CredentialsFile {
    #[serde(default)]
    accounts: Vec<StoredCredential>,
}

#[derive(Debug, Clone, Deserialize)]
struct StoredCredential {
    id: String,
    label: String,
    access_token: String,
}

/// File-backed provider reading `credentials.json` from the data directory:
/// `{"accounts": [{"id", "label", "access_token"}]}`. There is no
/// interactive sign-in path, so `create_if_none` behaves like `false`.
pub struct FileCredentialProvider {
    path: PathBuf,
}

impl FileCredentialProvider {
    pub fn new() -> Result<Self, String> {
        let data_dir = crate::modules::system::config::get_data_dir()?;
        Ok(Self::with_path(data_dir.join(CREDENTIALS_FILE)))
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    fn read_credentials(&self) -> Result<CredentialsFile, String> {
        if !self.path.exists() {
            return Err(format!(
                "credentials file not found at {}",
                self.path.display()
            ));
        }
        let content = fs::read_to_string(&self.path)
            .map_err(|e| format!("failed_to_read_credentials_file: {}", e))?;
        serde_json::from_str(content.trim())
            .map_err(|e| format!("failed_to_parse_credentials_file: {}", e))
    }
}

#[async_trait]
impl CredentialProvider for FileCredentialProvider {
    async fn discover_accounts(&self) -> Vec<Account> {
        match self.read_credentials() {
            Ok(file) => {
                info!("Discovered {} account(s)", file.accounts.len());
                file.accounts
                    .into_iter()
                    .map(|c| Account::new(c.id, c.label))
                    .collect()
            }
            Err(e) => {
                warn!("Error discovering accounts: {}", e);
                Vec::new()
            }
        }
    }

    async fn get_session(
        &self,
        account: &Account,
        _create_if_none: bool,
    ) -> Option<SessionCredential> {
        match self.read_credentials() {
            Ok(file) => {
                let session = file
                    .accounts
                    .into_iter()
                    .find(|c| c.id == account.id)
                    .map(|c| SessionCredential {
                        access_token: c.access_token,
                    });
                if session.is_some() {
                    info!("Got session for {}", account.label);
                }
                session
            }
            Err(e) => {
                warn!("Error getting session for {}: {}", account.label, e);
                None
            }
        }
    }
}
