//! In-memory contact store.
//!
//! Thread-safe and process-local. Intended for tests, dry runs, and as a
//! reference implementation of [`ContactStore`].

use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use contactlink_shared::{Contact, ContactId, ContactLink, ContactLinkError, NewContact, Result};

use crate::store::{ContactStore, closed_err, require_lookup_field};

fn lock_err(context: &'static str) -> ContactLinkError {
    ContactLinkError::StoreUnavailable(format!("poisoned lock: {context}"))
}

#[derive(Debug)]
struct MemoryState {
    rows: Vec<Contact>,
    next_id: i64,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            next_id: 1,
        }
    }
}

impl MemoryState {
    fn select(&self, predicate: impl Fn(&Contact) -> bool) -> Vec<Contact> {
        let mut found: Vec<Contact> = self
            .rows
            .iter()
            .filter(|c| c.deleted_at.is_none() && predicate(c))
            .cloned()
            .collect();
        found.sort_by_key(|c| (c.created_at, c.id));
        found
    }

    fn live_mut(&mut self, id: ContactId) -> Option<&mut Contact> {
        self.rows
            .iter_mut()
            .find(|c| c.id == id && c.deleted_at.is_none())
    }
}

/// Contact store holding rows in a `RwLock`-guarded vector.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store. Ids start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing rows, kept verbatim (timestamps, links,
    /// soft-delete markers). New ids continue after the highest seeded id.
    #[must_use]
    pub fn with_contacts(rows: Vec<Contact>) -> Self {
        let next_id = rows.iter().map(|c| c.id.0).max().unwrap_or(0) + 1;
        Self {
            state: RwLock::new(MemoryState { rows, next_id }),
            closed: AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_err());
        }
        Ok(())
    }

    fn read<T>(&self, context: &'static str, f: impl FnOnce(&MemoryState) -> T) -> Result<T> {
        self.check_open()?;
        let state = self.state.read().map_err(|_| lock_err(context))?;
        Ok(f(&state))
    }

    fn write<T>(
        &self,
        context: &'static str,
        f: impl FnOnce(&mut MemoryState) -> Result<T>,
    ) -> Result<T> {
        self.check_open()?;
        let mut state = self.state.write().map_err(|_| lock_err(context))?;
        f(&mut state)
    }

    /// Stamp `deletedAt` on a live contact. Soft-deleted rows vanish from every query.
    pub fn soft_delete(&self, id: ContactId) -> Result<()> {
        self.write("contacts.soft_delete", |state| {
            let contact = state
                .live_mut(id)
                .ok_or(ContactLinkError::NotFound { id })?;
            let now = Utc::now();
            contact.deleted_at = Some(now);
            contact.updated_at = now;
            Ok(())
        })
    }
}

#[async_trait]
impl ContactStore for MemoryStore {
    async fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<Contact>> {
        require_lookup_field(email, phone_number)?;
        self.read("contacts.find_by_email_or_phone", |state| {
            state.select(|c| {
                (email.is_some() && c.email.as_deref() == email)
                    || (phone_number.is_some() && c.phone_number.as_deref() == phone_number)
            })
        })
    }

    async fn find_by_cluster_anchor(&self, anchor: ContactId) -> Result<Vec<Contact>> {
        self.read("contacts.find_by_cluster_anchor", |state| {
            state.select(|c| c.id == anchor || c.linked_id == Some(anchor))
        })
    }

    async fn create(&self, contact: NewContact) -> Result<ContactId> {
        self.write("contacts.create", |state| {
            let id = ContactId(state.next_id);
            state.next_id += 1;
            let now = Utc::now();
            state.rows.push(Contact {
                id,
                phone_number: contact.phone_number,
                email: contact.email,
                linked_id: contact.link.linked_id(),
                link_precedence: contact.link.precedence(),
                created_at: now,
                updated_at: now,
                deleted_at: None,
            });
            Ok(id)
        })
    }

    async fn update(&self, id: ContactId, link: ContactLink) -> Result<()> {
        self.write("contacts.update", |state| {
            let contact = state
                .live_mut(id)
                .ok_or(ContactLinkError::NotFound { id })?;
            contact.relink(link, Utc::now());
            Ok(())
        })
    }

    async fn list_all(&self) -> Result<Vec<Contact>> {
        self.read("contacts.list_all", |state| state.select(|_| true))
    }

    async fn ping(&self) -> Result<()> {
        self.read("contacts.ping", |_| ())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::conformance;
    use chrono::{DateTime, Duration};
    use contactlink_shared::LinkPrecedence;

    #[tokio::test]
    async fn create_assigns_monotonic_ids() {
        conformance::create_assigns_monotonic_ids(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn lookup_matches_either_field() {
        conformance::lookup_matches_either_field(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn cluster_anchor_is_single_hop() {
        conformance::cluster_anchor_is_single_hop(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn update_relinks_and_bumps_timestamp() {
        conformance::update_relinks_and_bumps_timestamp(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn closed_store_rejects_calls() {
        conformance::closed_store_rejects_calls(&MemoryStore::new()).await;
    }

    fn seeded(id: i64, email: &str, created_at: DateTime<Utc>) -> Contact {
        Contact {
            id: ContactId(id),
            phone_number: None,
            email: Some(email.into()),
            linked_id: None,
            link_precedence: LinkPrecedence::Primary,
            created_at,
            updated_at: created_at,
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn seeded_rows_order_by_created_at_then_id() {
        let t0 = Utc::now() - Duration::days(2);
        let store = MemoryStore::with_contacts(vec![
            seeded(7, "late@x", t0 + Duration::hours(1)),
            seeded(5, "tie-b@x", t0),
            seeded(3, "tie-a@x", t0),
        ]);

        let ids: Vec<_> = store
            .list_all()
            .await
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![ContactId(3), ContactId(5), ContactId(7)]);

        let next = store
            .create(NewContact {
                email: Some("new@x".into()),
                phone_number: None,
                link: ContactLink::Primary,
            })
            .await
            .unwrap();
        assert_eq!(next, ContactId(8));
    }

    #[tokio::test]
    async fn soft_deleted_rows_are_hidden() {
        let store = MemoryStore::new();
        let a = store
            .create(NewContact {
                email: Some("a@x".into()),
                phone_number: Some("1".into()),
                link: ContactLink::Primary,
            })
            .await
            .unwrap();

        store.soft_delete(a).expect("soft delete");

        assert!(store.list_all().await.unwrap().is_empty());
        assert!(
            store
                .find_by_email_or_phone(Some("a@x"), None)
                .await
                .unwrap()
                .is_empty()
        );
        assert!(matches!(
            store.update(a, ContactLink::Primary).await,
            Err(ContactLinkError::NotFound { .. })
        ));
    }
}
