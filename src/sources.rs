// 🔌 Upstream Sources - the external backend as seen by the directory
//
// Accounts are authoritative (status, flags, roles). Records are
// supplementary. Both are read in full on every directory load.

use anyhow::Result;
use async_trait::async_trait;

use crate::entities::{AccountRow, AccountUpdate, RecordRow};

#[async_trait]
pub trait AccountsSource: Send + Sync {
    async fn list_accounts(&self) -> Result<Vec<AccountRow>>;

    /// Role label of one account, None when the account does not exist
    async fn find_role(&self, account_id: &str) -> Result<Option<String>>;
}

#[async_trait]
pub trait RecordsSource: Send + Sync {
    async fn list_records(&self) -> Result<Vec<RecordRow>>;
}

/// Partial update by primary key. No concurrency token: last write wins.
#[async_trait]
pub trait AccountsWriter: Send + Sync {
    /// `actor` is the user id of the admin making the change (for auditing)
    async fn update_account(
        &self,
        account_id: &str,
        update: &AccountUpdate,
        actor: &str,
    ) -> Result<()>;
}
