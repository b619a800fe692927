//! Transient in-memory view of one identity cluster.
//!
//! A [`Cluster`] lives for a single reconcile call. It is discovered from the
//! store by [`Cluster::expand`], then answers the questions the reconciler
//! needs: who is the primary, which rows must be relinked, whether an
//! observation carries anything new, and what the consolidated view is.

use std::collections::{BTreeMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use tracing::debug;

use contactlink_shared::{ConsolidatedContact, Contact, ContactId, ContactLink, Result};
use contactlink_storage::ContactStore;

/// Contacts of one cluster, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct Cluster {
    members: BTreeMap<ContactId, Contact>,
}

impl Cluster {
    /// Build a cluster from rows already in hand, without touching the store.
    pub fn from_contacts(contacts: impl IntoIterator<Item = Contact>) -> Self {
        Self {
            members: contacts.into_iter().map(|c| (c.id, c)).collect(),
        }
    }

    /// Grow `seeds` to the full cluster.
    ///
    /// Every known contact's id and `linkedId` is used once as an anchor for
    /// [`ContactStore::find_by_cluster_anchor`] until no new id appears. The
    /// worklist keeps stack depth flat; the number of store round-trips is
    /// bounded by the number of distinct ids referenced by the cluster.
    pub async fn expand(store: &dyn ContactStore, seeds: Vec<Contact>) -> Result<Self> {
        let mut members = BTreeMap::new();
        let mut worklist = VecDeque::new();
        let mut queried: HashSet<ContactId> = HashSet::new();

        for contact in seeds {
            enqueue_anchors(&mut worklist, &contact);
            members.insert(contact.id, contact);
        }

        while let Some(anchor) = worklist.pop_front() {
            if !queried.insert(anchor) {
                continue;
            }
            for contact in store.find_by_cluster_anchor(anchor).await? {
                if !members.contains_key(&contact.id) {
                    enqueue_anchors(&mut worklist, &contact);
                    members.insert(contact.id, contact);
                }
            }
        }

        debug!(
            size = members.len(),
            anchors = queried.len(),
            "cluster expanded"
        );
        Ok(Self { members })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn get(&self, id: ContactId) -> Option<&Contact> {
        self.members.get(&id)
    }

    /// The oldest contact: minimum `createdAt`, ties broken by minimum id.
    pub fn oldest(&self) -> Option<&Contact> {
        self.members.values().min_by_key(|c| (c.created_at, c.id))
    }

    /// Members in ascending `(createdAt, id)` order.
    pub fn ordered(&self) -> Vec<&Contact> {
        let mut ordered: Vec<&Contact> = self.members.values().collect();
        ordered.sort_by_key(|c| (c.created_at, c.id));
        ordered
    }

    /// Link changes that turn the cluster into a star around `primary`.
    ///
    /// Any other primary is demoted, any secondary pointing elsewhere is
    /// re-pointed, and `primary` itself is promoted if it is stored as a
    /// secondary. Returned in `(createdAt, id)` order.
    pub fn relink_plan(&self, primary: ContactId) -> Vec<(ContactId, ContactLink)> {
        self.ordered()
            .into_iter()
            .filter_map(|contact| {
                if contact.id == primary {
                    (!contact.is_primary() || contact.linked_id.is_some())
                        .then_some((contact.id, ContactLink::Primary))
                } else if contact.is_primary() || contact.linked_id != Some(primary) {
                    Some((contact.id, ContactLink::Secondary(primary)))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Mirror a store update on the in-memory copy.
    pub fn relink(&mut self, id: ContactId, link: ContactLink, at: DateTime<Utc>) {
        if let Some(contact) = self.members.get_mut(&id) {
            contact.relink(link, at);
        }
    }

    pub fn insert(&mut self, contact: Contact) {
        self.members.insert(contact.id, contact);
    }

    pub fn has_email(&self, email: &str) -> bool {
        self.members
            .values()
            .any(|c| c.email.as_deref() == Some(email))
    }

    pub fn has_phone_number(&self, phone_number: &str) -> bool {
        self.members
            .values()
            .any(|c| c.phone_number.as_deref() == Some(phone_number))
    }

    /// True when the email or phone is present and held by no member.
    ///
    /// Fields are checked independently: an email on one contact and a phone
    /// on another together count as already known.
    pub fn holds_new_information(&self, email: Option<&str>, phone_number: Option<&str>) -> bool {
        email.is_some_and(|e| !self.has_email(e))
            || phone_number.is_some_and(|p| !self.has_phone_number(p))
    }

    /// The outward view of the cluster with `primary` at its head.
    ///
    /// Emails and phone numbers are de-duplicated; the primary's values come
    /// first, the rest follow the creation order of the contact holding them.
    pub fn consolidate(&self, primary: ContactId) -> ConsolidatedContact {
        let head = self.members.get(&primary);
        let rest: Vec<&Contact> = self
            .ordered()
            .into_iter()
            .filter(|c| c.id != primary)
            .collect();

        let mut emails = Vec::new();
        let mut phone_numbers = Vec::new();
        for contact in head.into_iter().chain(rest.iter().copied()) {
            push_unique(&mut emails, contact.email.as_deref());
            push_unique(&mut phone_numbers, contact.phone_number.as_deref());
        }

        ConsolidatedContact {
            primary_contact_id: primary,
            emails,
            phone_numbers,
            secondary_contact_ids: rest.iter().map(|c| c.id).collect(),
        }
    }
}

fn enqueue_anchors(worklist: &mut VecDeque<ContactId>, contact: &Contact) {
    worklist.push_back(contact.id);
    if let Some(linked) = contact.linked_id {
        worklist.push_back(linked);
    }
}

fn push_unique(values: &mut Vec<String>, value: Option<&str>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        if !values.iter().any(|v| v == value) {
            values.push(value.to_owned());
        }
    }
}
