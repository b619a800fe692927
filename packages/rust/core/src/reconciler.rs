//! The identity-linking algorithm.
//!
//! [`Reconciler::identify`] takes one observation and leaves the store with a
//! single star-shaped cluster around the oldest matching contact:
//!
//! 1. Look up direct matches by email or phone; none means a new primary
//! 2. Expand the matches to the full cluster
//! 3. Pick the oldest contact as primary
//! 4. Demote other primaries and re-point stray secondaries
//! 5. Insert a secondary if the observation carries a new email or phone
//! 6. Return the consolidated view

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use contactlink_shared::{
    ConsolidatedContact, Contact, ContactId, ContactLink, ContactLinkError, IdentifyRequest,
    IdentifyResponse, NewContact, Result,
};
use contactlink_storage::ContactStore;

use crate::cluster::Cluster;

/// Reconciles observations against a [`ContactStore`].
///
/// Calls through one `Reconciler` run one at a time: each call reads the
/// cluster, decides, then writes, so two interleaved calls could both create
/// a primary for the same new pair. Separate processes sharing a database are
/// not coordinated; a duplicate cluster created that way is merged by the next
/// observation that touches both.
pub struct Reconciler {
    store: Arc<dyn ContactStore>,
    serial: Mutex<()>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn ContactStore>) -> Self {
        Self {
            store,
            serial: Mutex::new(()),
        }
    }

    /// The underlying store, e.g. to close it on shutdown.
    pub fn store(&self) -> &Arc<dyn ContactStore> {
        &self.store
    }

    /// Reconcile one observation and return its cluster's consolidated view.
    ///
    /// Fails with [`ContactLinkError::Validation`] before touching the store
    /// when neither an email nor a phone number is given. Store errors are
    /// propagated as-is; writes already made are not rolled back, and
    /// re-submitting the same observation converges to the same result.
    #[instrument(
        skip_all,
        fields(has_email = request.email().is_some(), has_phone = request.phone_number().is_some())
    )]
    pub async fn identify(&self, request: &IdentifyRequest) -> Result<IdentifyResponse> {
        let email = request.email();
        let phone_number = request.phone_number();
        if email.is_none() && phone_number.is_none() {
            return Err(ContactLinkError::validation(
                "Either email or phoneNumber must be provided",
            ));
        }

        let _guard = self.serial.lock().await;

        let matches = self
            .store
            .find_by_email_or_phone(email, phone_number)
            .await?;

        if matches.is_empty() {
            let id = self
                .store
                .create(NewContact {
                    email: email.map(str::to_owned),
                    phone_number: phone_number.map(str::to_owned),
                    link: ContactLink::Primary,
                })
                .await?;
            info!(%id, "created primary contact");

            return Ok(IdentifyResponse {
                contact: ConsolidatedContact {
                    primary_contact_id: id,
                    emails: email.map(str::to_owned).into_iter().collect(),
                    phone_numbers: phone_number.map(str::to_owned).into_iter().collect(),
                    secondary_contact_ids: Vec::new(),
                },
            });
        }

        debug!(matches = matches.len(), "direct matches found");
        let mut cluster = Cluster::expand(self.store.as_ref(), matches).await?;

        let primary = cluster
            .oldest()
            .map(|c| c.id)
            .ok_or_else(|| ContactLinkError::store("cluster expansion returned no contacts"))?;

        let plan = cluster.relink_plan(primary);
        if !plan.is_empty() {
            info!(%primary, relinked = plan.len(), "merging cluster onto primary");
        }
        for (id, link) in plan {
            self.store.update(id, link).await?;
            cluster.relink(id, link, Utc::now());
        }

        if cluster.holds_new_information(email, phone_number) {
            let id = self
                .store
                .create(NewContact {
                    email: email.map(str::to_owned),
                    phone_number: phone_number.map(str::to_owned),
                    link: ContactLink::Secondary(primary),
                })
                .await?;
            cluster.insert(self.fetch(id).await?);
            info!(%id, %primary, "created secondary contact");
        }

        Ok(IdentifyResponse {
            contact: cluster.consolidate(primary),
        })
    }

    /// Read back a freshly created row so its store-assigned timestamps are used.
    async fn fetch(&self, id: ContactId) -> Result<Contact> {
        self.store
            .find_by_cluster_anchor(id)
            .await?
            .into_iter()
            .find(|c| c.id == id)
            .ok_or(ContactLinkError::NotFound { id })
    }
}
