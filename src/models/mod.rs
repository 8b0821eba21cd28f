pub mod account;
pub mod config;
pub mod quota;

pub use account::{Account, AuthenticatedAccount, SetupAccountInfo};
pub use config::AppConfig;
pub use quota::{QuotaErrorKind, QuotaRecord, UserInfoResponse};
