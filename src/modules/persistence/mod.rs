pub mod store;

pub use store::{FileQuotaStore, QuotaStore};
