// 📡 Realtime Changes - row-change notifications folded into a snapshot
//
// The backend pushes one event per changed row. A Subscription is a lazy,
// endless sequence of those events; dropping it unsubscribes. Missed events
// (a slow subscriber) surface as Resync, which means "reload the directory".

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::directory::{sort_entries, DirectorySnapshot};
use crate::entities::{AccountRow, Identity, RecordRow, StudentEntry};

// ============================================================================
// CHANGE EVENT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    /// Account inserted or updated (full row after the change)
    AccountUpserted(AccountRow),

    AccountRemoved { account_id: String },

    /// Record inserted or updated (full row after the change)
    RecordUpserted(RecordRow),

    RecordRemoved { record_id: String },

    /// Events were missed; the snapshot can no longer be patched reliably
    Resync,
}

impl ChangeEvent {
    pub fn requires_reload(&self) -> bool {
        matches!(self, ChangeEvent::Resync)
    }
}

// ============================================================================
// FOLDING
// ============================================================================

impl DirectorySnapshot {
    /// Fold one change event into a copy of this snapshot.
    ///
    /// Keeps the merge rules: identities stay unique, an account claims its
    /// email and evicts a record using it, a record whose email is already
    /// claimed is not shown. An account moving onto another account's email
    /// is dropped, as are staff profiles. Hidden entries only reappear on the
    /// next full load.
    pub fn apply_change(&self, event: &ChangeEvent) -> DirectorySnapshot {
        let mut next = self.clone();

        match event {
            ChangeEvent::AccountUpserted(row) => {
                let entry = StudentEntry::from_account(row);
                if row.is_admin() {
                    remove(&mut next.entries, &entry.identity);
                    return next;
                }
                let email = entry.normalized_email();

                if let Some(email) = &email {
                    let claimed_by_other_account = next.entries.iter().any(|e| {
                        e.has_login
                            && e.identity != entry.identity
                            && e.normalized_email().as_ref() == Some(email)
                    });
                    if claimed_by_other_account {
                        // The old row is stale either way; which account keeps
                        // the email is settled by the next load.
                        warn!(identity = %entry.identity, "account email already used by another account, entry dropped");
                        remove(&mut next.entries, &entry.identity);
                        return next;
                    }
                    next.entries.retain(|e| {
                        e.has_login || e.normalized_email().as_ref() != Some(email)
                    });
                }
                upsert(&mut next.entries, entry);
            }

            ChangeEvent::AccountRemoved { account_id } => {
                remove(&mut next.entries, &Identity::Account(account_id.clone()));
            }

            ChangeEvent::RecordUpserted(row) => {
                let entry = StudentEntry::from_record(row);
                let collides = entry.normalized_email().is_some_and(|email| {
                    next.entries.iter().any(|e| {
                        e.identity != entry.identity
                            && e.normalized_email().as_ref() == Some(&email)
                    })
                });
                if collides {
                    debug!(identity = %entry.identity, "record email matches an existing entry, not shown");
                    remove(&mut next.entries, &entry.identity);
                } else {
                    upsert(&mut next.entries, entry);
                }
            }

            ChangeEvent::RecordRemoved { record_id } => {
                remove(&mut next.entries, &Identity::Record(record_id.clone()));
            }

            ChangeEvent::Resync => {}
        }

        next
    }
}

fn upsert(entries: &mut Vec<StudentEntry>, entry: StudentEntry) {
    match entries.iter_mut().find(|e| e.identity == entry.identity) {
        Some(existing) => *existing = entry,
        None => entries.push(entry),
    }
    sort_entries(entries);
}

fn remove(entries: &mut Vec<StudentEntry>, identity: &Identity) {
    entries.retain(|e| &e.identity != identity);
}

// ============================================================================
// HUB + SUBSCRIPTION
// ============================================================================

/// Fan-out point for row-change events
#[derive(Clone)]
pub struct ChangeHub {
    sender: broadcast::Sender<ChangeEvent>,
    active: Arc<AtomicUsize>,
}

impl ChangeHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        ChangeHub {
            sender,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Publish an event; having no subscribers is not an error
    pub fn publish(&self, event: ChangeEvent) {
        let delivered = self.sender.send(event).unwrap_or(0);
        debug!(delivered, "change event published");
    }

    pub fn subscribe(&self) -> Subscription {
        self.active.fetch_add(1, Ordering::SeqCst);
        Subscription {
            receiver: self.sender.subscribe(),
            active: self.active.clone(),
        }
    }

    /// Live subscriptions (dropped ones are not counted)
    pub fn subscriber_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new(256)
    }
}

pub struct Subscription {
    receiver: broadcast::Receiver<ChangeEvent>,
    active: Arc<AtomicUsize>,
}

impl Subscription {
    /// Next event. None once the hub and every clone of it are dropped.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        match self.receiver.recv().await {
            Ok(event) => Some(event),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "change subscription lagged, directory needs a reload");
                Some(ChangeEvent::Resync)
            }
            Err(RecvError::Closed) => None,
        }
    }

    /// Fresh subscription starting from the hub's next event
    pub fn resubscribe(&self) -> Subscription {
        self.active.fetch_add(1, Ordering::SeqCst);
        Subscription {
            receiver: self.receiver.resubscribe(),
            active: self.active.clone(),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        debug!("change subscription closed");
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::build_directory;
    use crate::entities::StudentStatus;

    fn snapshot(accounts: &[AccountRow], records: &[RecordRow]) -> DirectorySnapshot {
        DirectorySnapshot::new(build_directory(accounts, records))
    }

    fn account(id: &str, name: &str, email: &str) -> AccountRow {
        AccountRow {
            id: id.into(),
            name: Some(name.into()),
            email: Some(email.into()),
            ..Default::default()
        }
    }

    fn record(id: &str, name: &str, email: &str) -> RecordRow {
        RecordRow {
            id: id.into(),
            name: Some(name.into()),
            email: Some(email.into()),
            created_at: None,
        }
    }

    fn identities(snapshot: &DirectorySnapshot) -> Vec<String> {
        snapshot.entries.iter().map(|e| e.identity.to_string()).collect()
    }

    #[test]
    fn test_account_upsert_updates_in_place() {
        let before = snapshot(&[account("1", "Ana", "a@x.com")], &[]);
        let mut row = account("1", "Ana", "a@x.com");
        row.status = Some("Pausado".into());

        let after = before.apply_change(&ChangeEvent::AccountUpserted(row));
        assert_eq!(after.len(), 1);
        assert_eq!(after.entries[0].status, StudentStatus::Paused);
    }

    #[test]
    fn test_new_account_evicts_record_with_same_email() {
        let before = snapshot(&[], &[record("9", "Bea", "b@x.com")]);

        let after = before.apply_change(&ChangeEvent::AccountUpserted(account("2", "Bea", "B@X.com")));
        assert_eq!(identities(&after), vec!["account:2"]);
    }

    #[test]
    fn test_account_moving_onto_taken_email_is_dropped() {
        let before = snapshot(&[account("1", "Ana", "a@x.com"), account("2", "Bea", "b@x.com")], &[]);
        let mut row = account("2", "Bea", "a@x.com");
        row.status = Some("Inativo".into());

        let after = before.apply_change(&ChangeEvent::AccountUpserted(row));
        assert_eq!(identities(&after), vec!["account:1"]);
        assert!(after
            .entries
            .iter()
            .all(|e| e.normalized_email().as_deref() != Some("b@x.com")));
    }

    #[test]
    fn test_account_promoted_to_admin_leaves_directory() {
        let before = snapshot(&[account("1", "Ana", "a@x.com"), account("2", "Bea", "b@x.com")], &[]);
        let mut row = account("2", "Bea", "b@x.com");
        row.role = Some("admin".into());

        let after = before.apply_change(&ChangeEvent::AccountUpserted(row));
        assert_eq!(identities(&after), vec!["account:1"]);
    }

    #[test]
    fn test_record_with_claimed_email_not_shown() {
        let before = snapshot(&[account("1", "Ana", "a@x.com")], &[]);

        let after = before.apply_change(&ChangeEvent::RecordUpserted(record("9", "Ana R", "a@x.com")));
        assert_eq!(identities(&after), vec!["account:1"]);
    }

    #[test]
    fn test_record_insert_is_sorted() {
        let before = snapshot(&[account("1", "Ana", "a@x.com"), account("2", "Caio", "c@x.com")], &[]);

        let after = before.apply_change(&ChangeEvent::RecordUpserted(record("9", "Bea", "b@x.com")));
        assert_eq!(identities(&after), vec!["account:1", "record:9", "account:2"]);
    }

    #[test]
    fn test_removals() {
        let before = snapshot(&[account("1", "Ana", "a@x.com")], &[record("9", "Bea", "b@x.com")]);

        let after = before
            .apply_change(&ChangeEvent::AccountRemoved { account_id: "1".into() })
            .apply_change(&ChangeEvent::RecordRemoved { record_id: "9".into() });
        assert!(after.is_empty());
        assert_eq!(before.len(), 2);
    }

    #[test]
    fn test_resync_leaves_snapshot_alone() {
        let before = snapshot(&[account("1", "Ana", "a@x.com")], &[]);
        let after = before.apply_change(&ChangeEvent::Resync);
        assert_eq!(after, before);
        assert!(ChangeEvent::Resync.requires_reload());
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(ChangeEvent::RecordRemoved { record_id: "9".into() }).unwrap();
        assert_eq!(json["type"], "record_removed");
        assert_eq!(json["record_id"], "9");
    }

    #[tokio::test]
    async fn test_subscription_receives_published_events() {
        let hub = ChangeHub::default();
        let mut sub = hub.subscribe();

        hub.publish(ChangeEvent::RecordRemoved { record_id: "9".into() });
        let event = sub.next().await.unwrap();
        assert_eq!(event, ChangeEvent::RecordRemoved { record_id: "9".into() });
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let hub = ChangeHub::default();
        let first = hub.subscribe();
        let second = first.resubscribe();
        assert_eq!(hub.subscriber_count(), 2);

        drop(first);
        assert_eq!(hub.subscriber_count(), 1);
        drop(second);
        assert_eq!(hub.subscriber_count(), 0);

        // Publishing with nobody listening is fine
        hub.publish(ChangeEvent::Resync);
    }

    #[tokio::test]
    async fn test_lagged_subscription_yields_resync() {
        let hub = ChangeHub::new(1);
        let mut sub = hub.subscribe();

        hub.publish(ChangeEvent::RecordRemoved { record_id: "1".into() });
        hub.publish(ChangeEvent::RecordRemoved { record_id: "2".into() });

        assert_eq!(sub.next().await, Some(ChangeEvent::Resync));
        assert_eq!(
            sub.next().await,
            Some(ChangeEvent::RecordRemoved { record_id: "2".into() })
        );
    }
}
