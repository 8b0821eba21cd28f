use std::fs;
use std::path::PathBuf;

use crate::error::{AppError, AppResult};
use crate::models::QuotaRecord;

const ACCOUNTS_FILE: &str = "accounts.json";
const LAST_REFRESH_FILE: &str = "last_refresh.json";
const QUOTAS_DIR: &str = "quotas";

/// Durable key-value persistence for the quota cache: last-known record per
/// account, the tracked account-id list, and the last global refresh time.
/// Pure per-key semantics, no cross-key transactions.
pub trait QuotaStore: Send + Sync {
    fn save_quota(&self, record: &QuotaRecord) -> AppResult<()>;
    fn load_quota(&self, account_id: &str) -> AppResult<Option<QuotaRecord>>;
    /// Loads the record of every tracked account, skipping ids with no
    /// cached record.
    fn load_all_quotas(&self) -> AppResult<Vec<QuotaRecord>>;
    fn save_account_list(&self, account_ids: &[String]) -> AppResult<()>;
    fn load_account_list(&self) -> AppResult<Vec<String>>;
    fn save_last_refresh(&self, timestamp: i64) -> AppResult<()>;
    fn load_last_refresh(&self) -> AppResult<i64>;
    /// Drops the account from both the tracked list and the per-account
    /// quota entry.
    fn remove_account(&self, account_id: &str) -> AppResult<()>;
    fn clear_all(&self) -> AppResult<()>;
}

/// JSON-file store under the data directory: `quotas/<account_id>.json`
/// per record, plus `accounts.json` and `last_refresh.json`.
pub struct FileQuotaStore {
    root: PathBuf,
}

impl FileQuotaStore {
    pub fn new() -> AppResult<Self> {
        let root = crate::modules::system::config::get_data_dir().map_err(AppError::Config)?;
        Ok(Self::with_root(root))
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    fn quotas_dir(&self) -> AppResult<PathBuf> {
        let dir = self.root.join(QUOTAS_DIR);
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        Ok(dir)
    }

    fn quota_path(&self, account_id: &str) -> AppResult<PathBuf> {
        Ok(self.quotas_dir()?.join(format!("{}.json", account_id)))
    }
}

impl QuotaStore for FileQuotaStore {
    fn save_quota(&self, record: &QuotaRecord) -> AppResult<()> {
        let path = self.quota_path(&record.account_id)?;
        let content = serde_json::to_string_pretty(record)?;
        fs::write(&path, content)?;
        Ok(())
    }

    fn load_quota(&self, account_id: &str) -> AppResult<Option<QuotaRecord>> {
        let path = self.quota_path(account_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn load_all_quotas(&self) -> AppResult<Vec<QuotaRecord>> {
        let mut records = Vec::new();
        for account_id in self.load_account_list()? {
            if let Some(record) = self.load_quota(&account_id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn save_account_list(&self, account_ids: &[String]) -> AppResult<()> {
        let path = self.root.join(ACCOUNTS_FILE);
        let temp_path = self.root.join(format!("{}.tmp", ACCOUNTS_FILE));

        let content = serde_json::to_string_pretty(account_ids)?;
        fs::write(&temp_path, content)?;
        fs::rename(temp_path, path)?;
        Ok(())
    }

    fn load_account_list(&self) -> AppResult<Vec<String>> {
        let path = self.root.join(ACCOUNTS_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn save_last_refresh(&self, timestamp: i64) -> AppResult<()> {
        let path = self.root.join(LAST_REFRESH_FILE);
        fs::write(&path, serde_json::to_string(&timestamp)?)?;
        Ok(())
    }

    fn load_last_refresh(&self) -> AppResult<i64> {
        let path = self.root.join(LAST_REFRESH_FILE);
        if !path.exists() {
            return Ok(0);
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn remove_account(&self, account_id: &str) -> AppResult<()> {
        let path = self.quota_path(account_id)?;
        if path.exists() {
            fs::remove_file(&path)?;
        }
        let remaining: Vec<String> = self
            .load_account_list()?
            .into_iter()
            .filter(|id| id != account_id)
            .collect();
        self.save_account_list(&remaining)
    }

    fn clear_all(&self) -> AppResult<()> {
        for account_id in self.load_account_list()? {
            let path = self.quota_path(&account_id)?;
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        for file in [ACCOUNTS_FILE, LAST_REFRESH_FILE] {
            let path = self.root.join(file);
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}
