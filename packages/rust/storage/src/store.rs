//! The persistence contract consumed by the reconciler.

use async_trait::async_trait;
use contactlink_shared::{Contact, ContactId, ContactLink, ContactLinkError, NewContact, Result};

/// Durable storage and lookup of contact rows. Holds no identity-linking logic.
///
/// Every read excludes soft-deleted rows and returns contacts ordered by
/// `createdAt` ascending, ties broken by id. Every write touches exactly one
/// row; there is no multi-row transaction.
#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Contacts whose email equals `email` OR whose phone equals `phone_number`.
    ///
    /// An absent argument matches nothing. Passing neither is a caller error
    /// and fails with [`ContactLinkError::Config`].
    async fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<Contact>>;

    /// Contacts where `id = anchor` OR `linkedId = anchor` (one hop of cluster expansion).
    async fn find_by_cluster_anchor(&self, anchor: ContactId) -> Result<Vec<Contact>>;

    /// Insert a row stamped `createdAt = updatedAt = now` and return its id.
    async fn create(&self, contact: NewContact) -> Result<ContactId>;

    /// Rewrite a row's precedence and link, bumping `updatedAt`.
    ///
    /// Fails with [`ContactLinkError::NotFound`] when the id is missing or soft-deleted.
    async fn update(&self, id: ContactId, link: ContactLink) -> Result<()>;

    /// Every live contact.
    async fn list_all(&self) -> Result<Vec<Contact>>;

    /// Cheap reachability check.
    async fn ping(&self) -> Result<()>;

    /// Shut the store down. Later calls fail with [`ContactLinkError::StoreUnavailable`].
    async fn close(&self) -> Result<()>;
}

/// Reject a lookup that names neither field.
pub(crate) fn require_lookup_field(email: Option<&str>, phone_number: Option<&str>) -> Result<()> {
    if email.is_none() && phone_number.is_none() {
        return Err(ContactLinkError::config(
            "find_by_email_or_phone requires an email or a phone number",
        ));
    }
    Ok(())
}

pub(crate) fn closed_err() -> ContactLinkError {
    ContactLinkError::StoreUnavailable("store is closed".into())
}

/// Behaviour every backend must share, run against each implementation's tests.
#[cfg(test)]
pub(crate) mod conformance {
    use super::*;
    use contactlink_shared::LinkPrecedence;

    fn new_primary(email: Option<&str>, phone: Option<&str>) -> NewContact {
        NewContact {
            email: email.map(str::to_owned),
            phone_number: phone.map(str::to_owned),
            link: ContactLink::Primary,
        }
    }

    pub(crate) async fn create_assigns_monotonic_ids(store: &dyn ContactStore) {
        let a = store
            .create(new_primary(Some("lorraine@hillvalley.edu"), Some("123456")))
            .await
            .expect("create a");
        let b = store
            .create(new_primary(Some("mcfly@hillvalley.edu"), None))
            .await
            .expect("create b");
        assert!(b > a);

        let all = store.list_all().await.expect("list");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, a);
        assert_eq!(all[0].created_at, all[0].updated_at);
        assert_eq!(all[0].link_precedence, LinkPrecedence::Primary);
        assert_eq!(all[0].linked_id, None);
        assert_eq!(all[1].phone_number, None);
    }

    pub(crate) async fn lookup_matches_either_field(store: &dyn ContactStore) {
        let a = store
            .create(new_primary(Some("george@hillvalley.edu"), Some("919191")))
            .await
            .unwrap();
        let b = store
            .create(new_primary(Some("biffsucks@hillvalley.edu"), Some("717171")))
            .await
            .unwrap();

        let found = store
            .find_by_email_or_phone(Some("george@hillvalley.edu"), Some("717171"))
            .await
            .expect("lookup");
        let ids: Vec<_> = found.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![a, b]);

        let found = store
            .find_by_email_or_phone(None, Some("919191"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, a);

        // Matching is exact: no case folding or trimming.
        let found = store
            .find_by_email_or_phone(Some("GEORGE@hillvalley.edu"), None)
            .await
            .unwrap();
        assert!(found.is_empty());

        let err = store.find_by_email_or_phone(None, None).await.unwrap_err();
        assert!(matches!(err, ContactLinkError::Config { .. }));
    }

    pub(crate) async fn cluster_anchor_is_single_hop(store: &dyn ContactStore) {
        let primary = store
            .create(new_primary(Some("doc@hillvalley.edu"), Some("555")))
            .await
            .unwrap();
        let secondary = store
            .create(NewContact {
                email: Some("emmett@hillvalley.edu".into()),
                phone_number: Some("555".into()),
                link: ContactLink::Secondary(primary),
            })
            .await
            .unwrap();
        let unrelated = store
            .create(new_primary(Some("marty@hillvalley.edu"), None))
            .await
            .unwrap();

        let cluster = store.find_by_cluster_anchor(primary).await.unwrap();
        let ids: Vec<_> = cluster.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![primary, secondary]);
        assert_eq!(cluster[1].linked_id, Some(primary));

        let alone = store.find_by_cluster_anchor(unrelated).await.unwrap();
        assert_eq!(alone.len(), 1);
    }

    pub(crate) async fn update_relinks_and_bumps_timestamp(store: &dyn ContactStore) {
        let a = store.create(new_primary(Some("a@x"), None)).await.unwrap();
        let b = store.create(new_primary(Some("b@x"), None)).await.unwrap();
        let before = store.find_by_cluster_anchor(b).await.unwrap()[0].clone();

        store
            .update(b, ContactLink::Secondary(a))
            .await
            .expect("update");

        let cluster = store.find_by_cluster_anchor(a).await.unwrap();
        assert_eq!(cluster.len(), 2);
        let after = cluster.iter().find(|c| c.id == b).expect("b in cluster");
        assert_eq!(after.link_precedence, LinkPrecedence::Secondary);
        assert_eq!(after.linked_id, Some(a));
        assert_eq!(after.created_at, before.created_at);
        assert!(after.updated_at >= before.updated_at);

        let err = store
            .update(ContactId(9_999), ContactLink::Primary)
            .await
            .unwrap_err();
        assert!(matches!(err, ContactLinkError::NotFound { id } if id == ContactId(9_999)));
    }

    pub(crate) async fn closed_store_rejects_calls(store: &dyn ContactStore) {
        store.ping().await.expect("ping while open");
        store.close().await.expect("close");

        assert!(matches!(
            store.ping().await,
            Err(ContactLinkError::StoreUnavailable(_))
        ));
        assert!(matches!(
            store.create(new_primary(Some("late@x"), None)).await,
            Err(ContactLinkError::StoreUnavailable(_))
        ));
        assert!(matches!(
            store.list_all().await,
            Err(ContactLinkError::StoreUnavailable(_))
        ));
    }
}
