// 📇 Student Directory Aggregator - one deduplicated list from two sources
//
// Accounts (login-capable profiles) and records (patient files entered by
// the studio) are populated independently. The admin view needs them as
// one list where:
//   - every identity is unique
//   - no two entries share a (trimmed, lowercased) email
//   - on an email collision the account wins and the record is dropped
//
// Snapshots are rebuilt on every load. Mutations write to the accounts
// source first, then patch a copy of the snapshot (no reload).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::entities::{
    compare_names, AccountRow, AccountUpdate, Identity, RecordRow, StudentEntry, StudentStatus,
};
use crate::error::{DirectoryError, Result};
use crate::session::SessionContext;
use crate::sources::{AccountsSource, AccountsWriter, RecordsSource};

// ============================================================================
// SNAPSHOT
// ============================================================================

/// One immutable result of a directory build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectorySnapshot {
    pub entries: Vec<StudentEntry>,

    pub built_at: DateTime<Utc>,

    /// Set when the records source failed and only accounts are shown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records_error: Option<String>,
}

impl DirectorySnapshot {
    pub fn new(entries: Vec<StudentEntry>) -> Self {
        DirectorySnapshot {
            entries,
            built_at: Utc::now(),
            records_error: None,
        }
    }

    pub fn get(&self, identity: &Identity) -> Option<&StudentEntry> {
        self.entries.iter().find(|e| &e.identity == identity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The degraded-build warning, if this snapshot is account-only
    pub fn partial_failure(&self) -> Option<DirectoryError> {
        self.records_error
            .as_ref()
            .map(|msg| DirectoryError::SourcePartiallyUnavailable(msg.clone()))
    }

    /// Copy of this snapshot with one entry changed, everything else untouched
    fn patched<F>(&self, identity: &Identity, patch: F) -> DirectorySnapshot
    where
        F: FnOnce(&mut StudentEntry),
    {
        let mut next = self.clone();
        if let Some(entry) = next.entries.iter_mut().find(|e| &e.identity == identity) {
            patch(entry);
        }
        next
    }
}

// ============================================================================
// MERGE (pure)
// ============================================================================

/// Merge account and record rows into one ordered, deduplicated list.
///
/// Neither input is assumed sorted or deduplicated. Staff (admin) profiles
/// are not students and are left out. Rows repeating an identity already
/// seen are skipped. A record is kept only if its email is
/// blank or not yet claimed by an account (or an earlier record). The result
/// is stable-sorted by name, so ties keep accounts before records.
pub fn build_directory(accounts: &[AccountRow], records: &[RecordRow]) -> Vec<StudentEntry> {
    let mut seen_ids: HashSet<Identity> = HashSet::new();
    let mut seen_emails: HashSet<String> = HashSet::new();
    let mut entries = Vec::with_capacity(accounts.len() + records.len());

    for row in accounts {
        if row.is_admin() {
            debug!(account_id = %row.id, "skipping staff profile");
            continue;
        }
        let entry = StudentEntry::from_account(row);
        if !seen_ids.insert(entry.identity.clone()) {
            debug!(identity = %entry.identity, "skipping repeated account row");
            continue;
        }
        if let Some(email) = entry.normalized_email() {
            if !seen_emails.insert(email) {
                warn!(identity = %entry.identity, "account email already used by another account, skipping");
                continue;
            }
        }
        entries.push(entry);
    }

    let account_count = entries.len();

    for row in records {
        let entry = StudentEntry::from_record(row);
        if seen_ids.contains(&entry.identity) {
            debug!(identity = %entry.identity, "skipping repeated record row");
            continue;
        }
        if let Some(email) = entry.normalized_email() {
            if !seen_emails.insert(email) {
                debug!(identity = %entry.identity, "record email matches an existing entry, dropped");
                continue;
            }
        }
        seen_ids.insert(entry.identity.clone());
        entries.push(entry);
    }

    debug!(
        accounts = account_count,
        records = entries.len() - account_count,
        "merged directory sources"
    );

    sort_entries(&mut entries);
    entries
}

/// Stable name order; equal names put accounts before records
pub(crate) fn sort_entries(entries: &mut [StudentEntry]) {
    entries.sort_by(|a, b| {
        compare_names(&a.name, &b.name).then_with(|| b.has_login.cmp(&a.has_login))
    });
}

// ============================================================================
// AGGREGATOR (sources + writes)
// ============================================================================

pub struct DirectoryAggregator {
    accounts: Arc<dyn AccountsSource>,
    records: Arc<dyn RecordsSource>,
    writer: Arc<dyn AccountsWriter>,
}

impl DirectoryAggregator {
    pub fn new(
        accounts: Arc<dyn AccountsSource>,
        records: Arc<dyn RecordsSource>,
        writer: Arc<dyn AccountsWriter>,
    ) -> Self {
        DirectoryAggregator {
            accounts,
            records,
            writer,
        }
    }

    /// Aggregator over a single backend that serves all three roles
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: AccountsSource + RecordsSource + AccountsWriter + 'static,
    {
        DirectoryAggregator {
            accounts: backend.clone(),
            records: backend.clone(),
            writer: backend,
        }
    }

    pub fn accounts(&self) -> &dyn AccountsSource {
        self.accounts.as_ref()
    }

    /// Build a fresh snapshot.
    ///
    /// Both reads are issued together. An accounts failure fails the whole
    /// build; a records failure is logged and yields an account-only snapshot.
    pub async fn load(&self, session: &SessionContext) -> Result<DirectorySnapshot> {
        session.require_admin()?;

        let (accounts, records) =
            tokio::join!(self.accounts.list_accounts(), self.records.list_records());

        let accounts = accounts.map_err(|e| {
            warn!(error = %e, "accounts source failed, directory not built");
            DirectoryError::SourceUnavailable(format!("{:#}", e))
        })?;

        let (records, records_error) = match records {
            Ok(rows) => (rows, None),
            Err(e) => {
                warn!(error = %e, "records source failed, showing accounts only");
                (Vec::new(), Some(format!("{:#}", e)))
            }
        };

        let mut snapshot = DirectorySnapshot::new(build_directory(&accounts, &records));
        snapshot.records_error = records_error;

        info!(
            entries = snapshot.len(),
            degraded = snapshot.records_error.is_some(),
            "directory loaded"
        );
        Ok(snapshot)
    }

    /// Move an account-backed entry to Active, Paused or Inactive.
    ///
    /// Writes `{status, status_changed_at, inactivated_at}` first; only a
    /// successful write produces the patched snapshot.
    pub async fn apply_status_change(
        &self,
        session: &SessionContext,
        snapshot: &DirectorySnapshot,
        identity: &Identity,
        new_status: StudentStatus,
    ) -> Result<DirectorySnapshot> {
        session.require_admin()?;
        let account_id = account_target(snapshot, identity)?;
        if !new_status.is_login_state() {
            return Err(DirectoryError::InvalidStatus(new_status.to_string()));
        }

        let update = AccountUpdate::status_change(new_status, Utc::now());
        self.write(account_id, &update, &session.user_id).await?;

        info!(%identity, status = %new_status, actor = %session.user_id, "status changed");
        Ok(snapshot.patched(identity, |entry| {
            entry.status = new_status;
            entry.status_changed_at = update.status_changed_at;
            entry.inactivated_at = update.inactivated_at.flatten();
        }))
    }

    /// Flip self-evaluation access for an account-backed entry
    pub async fn toggle_self_eval(
        &self,
        session: &SessionContext,
        snapshot: &DirectorySnapshot,
        identity: &Identity,
    ) -> Result<DirectorySnapshot> {
        session.require_admin()?;
        let account_id = account_target(snapshot, identity)?;
        // account_target guarantees the entry exists
        let enabled = !snapshot
            .get(identity)
            .map(|e| e.self_eval_enabled)
            .unwrap_or(false);

        self.write(account_id, &AccountUpdate::self_eval(enabled), &session.user_id)
            .await?;

        info!(%identity, enabled, actor = %session.user_id, "self-evaluation toggled");
        Ok(snapshot.patched(identity, |entry| entry.self_eval_enabled = enabled))
    }

    async fn write(&self, account_id: &str, update: &AccountUpdate, actor: &str) -> Result<()> {
        self.writer
            .update_account(account_id, update, actor)
            .await
            .map_err(|e| {
                warn!(account_id, error = %e, "account write failed");
                DirectoryError::PersistenceFailed(format!("{:#}", e))
            })
    }
}

/// Resolve the account id a mutation should be written to.
///
/// Record identities are rejected before looking anything up.
fn account_target<'a>(snapshot: &DirectorySnapshot, identity: &'a Identity) -> Result<&'a str> {
    let account_id = identity
        .account_id()
        .ok_or_else(|| DirectoryError::UnsupportedForRecordOnly(identity.clone()))?;

    match snapshot.get(identity) {
        None => Err(DirectoryError::EntryNotFound(identity.clone())),
        Some(entry) if !entry.has_login => {
            Err(DirectoryError::UnsupportedForRecordOnly(identity.clone()))
        }
        Some(_) => Ok(account_id),
    }
}

// ============================================================================
// TESTS
// ============================================================================
