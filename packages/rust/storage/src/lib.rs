//! Contact persistence for contactlink.
//!
//! [`ContactStore`] is the contract the reconciler consumes. Two backends
//! implement it:
//! - [`LibsqlStore`]: embedded libSQL database (read-write via
//!   [`LibsqlStore::open`], read-only via [`LibsqlStore::open_readonly`])
//! - [`MemoryStore`]: process-local rows for tests and dry runs

mod memory;
mod migrations;
mod store;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use contactlink_shared::{
    Contact, ContactId, ContactLink, ContactLinkError, LinkPrecedence, NewContact, Result,
};
use libsql::params::IntoParams;
use libsql::{Connection, Database, params};

pub use memory::MemoryStore;
pub use store::ContactStore;

use store::{closed_err, require_lookup_field};

const CONTACT_COLUMNS: &str =
    "id, phoneNumber, email, linkedId, linkPrecedence, createdAt, updatedAt, deletedAt";

/// Contact store backed by a libSQL database.
pub struct LibsqlStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
    closed: AtomicBool,
}

impl LibsqlStore {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ContactLinkError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(ContactLinkError::store)?;

        let store = Self::from_database(db, false)?;
        store.run_migrations().await?;
        tracing::debug!(path = %path.display(), "contact store opened");
        Ok(store)
    }

    /// Open a private in-memory database with the schema applied.
    pub async fn open_in_memory() -> Result<Self> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(ContactLinkError::store)?;

        let store = Self::from_database(db, false)?;
        store.run_migrations().await?;
        Ok(store)
    }

    /// Open a database at `path` in read-only mode (listing and health checks).
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(ContactLinkError::store)?;

        Self::from_database(db, true)
    }

    fn from_database(db: Database, readonly: bool) -> Result<Self> {
        let conn = db.connect().map_err(ContactLinkError::store)?;
        Ok(Self {
            db,
            conn,
            readonly,
            closed: AtomicBool::new(false),
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        ContactLinkError::StoreUnavailable(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_err());
        }
        Ok(())
    }

    /// Ensure we're open and in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        self.check_open()?;
        if self.readonly {
            return Err(ContactLinkError::StoreUnavailable(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    async fn query_contacts(&self, sql: &str, params: impl IntoParams) -> Result<Vec<Contact>> {
        self.check_open()?;
        let mut rows = self
            .conn
            .query(sql, params)
            .await
            .map_err(ContactLinkError::store)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(ContactLinkError::store)? {
            results.push(row_to_contact(&row)?);
        }
        Ok(results)
    }

    /// Stamp `deletedAt` on a live contact. Soft-deleted rows vanish from every query.
    pub async fn soft_delete(&self, id: ContactId) -> Result<()> {
        self.check_writable()?;
        let now = format_timestamp(Utc::now());
        let affected = self
            .conn
            .execute(
                "UPDATE contacts SET deletedAt = ?1, updatedAt = ?1
                 WHERE id = ?2 AND deletedAt IS NULL",
                params![now.as_str(), id.0],
            )
            .await
            .map_err(ContactLinkError::store)?;

        if affected == 0 {
            return Err(ContactLinkError::NotFound { id });
        }
        tracing::info!(%id, "contact soft-deleted");
        Ok(())
    }
}

#[async_trait]
impl ContactStore for LibsqlStore {
    async fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<Contact>> {
        require_lookup_field(email, phone_number)?;
        match (email, phone_number) {
            (Some(email), Some(phone)) => {
                self.query_contacts(
                    &format!(
                        "SELECT {CONTACT_COLUMNS} FROM contacts
                         WHERE deletedAt IS NULL AND (email = ?1 OR phoneNumber = ?2)
                         ORDER BY createdAt ASC, id ASC"
                    ),
                    params![email, phone],
                )
                .await
            }
            (Some(email), None) => {
                self.query_contacts(
                    &format!(
                        "SELECT {CONTACT_COLUMNS} FROM contacts
                         WHERE deletedAt IS NULL AND email = ?1
                         ORDER BY createdAt ASC, id ASC"
                    ),
                    params![email],
                )
                .await
            }
            (None, Some(phone)) => {
                self.query_contacts(
                    &format!(
                        "SELECT {CONTACT_COLUMNS} FROM contacts
                         WHERE deletedAt IS NULL AND phoneNumber = ?1
                         ORDER BY createdAt ASC, id ASC"
                    ),
                    params![phone],
                )
                .await
            }
            (None, None) => Ok(Vec::new()),
        }
    }

    async fn find_by_cluster_anchor(&self, anchor: ContactId) -> Result<Vec<Contact>> {
        self.query_contacts(
            &format!(
                "SELECT {CONTACT_COLUMNS} FROM contacts
                 WHERE deletedAt IS NULL AND (id = ?1 OR linkedId = ?1)
                 ORDER BY createdAt ASC, id ASC"
            ),
            params![anchor.0],
        )
        .await
    }

    async fn create(&self, contact: NewContact) -> Result<ContactId> {
        self.check_writable()?;
        let now = format_timestamp(Utc::now());
        let mut rows = self
            .conn
            .query(
                "INSERT INTO contacts (phoneNumber, email, linkedId, linkPrecedence, createdAt, updatedAt)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 RETURNING id",
                params![
                    contact.phone_number.as_deref(),
                    contact.email.as_deref(),
                    contact.link.linked_id().map(|id| id.0),
                    contact.link.precedence().as_str(),
                    now.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(ContactLinkError::store)?;

        let row = rows
            .next()
            .await
            .map_err(ContactLinkError::store)?
            .ok_or_else(|| ContactLinkError::store("insert returned no id"))?;
        let id = ContactId(row.get::<i64>(0).map_err(ContactLinkError::store)?);
        tracing::debug!(%id, precedence = %contact.link.precedence(), "contact inserted");
        Ok(id)
    }

    async fn update(&self, id: ContactId, link: ContactLink) -> Result<()> {
        self.check_writable()?;
        let now = format_timestamp(Utc::now());
        let affected = self
            .conn
            .execute(
                "UPDATE contacts SET linkPrecedence = ?1, linkedId = ?2, updatedAt = ?3
                 WHERE id = ?4 AND deletedAt IS NULL",
                params![
                    link.precedence().as_str(),
                    link.linked_id().map(|l| l.0),
                    now.as_str(),
                    id.0,
                ],
            )
            .await
            .map_err(ContactLinkError::store)?;

        if affected == 0 {
            return Err(ContactLinkError::NotFound { id });
        }
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Contact>> {
        self.query_contacts(
            &format!(
                "SELECT {CONTACT_COLUMNS} FROM contacts
                 WHERE deletedAt IS NULL
                 ORDER BY createdAt ASC, id ASC"
            ),
            params![],
        )
        .await
    }

    async fn ping(&self) -> Result<()> {
        self.check_open()?;
        self.conn
            .query("SELECT 1", params![])
            .await
            .map_err(ContactLinkError::store)?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::info!("contact store closed");
        }
        Ok(())
    }
}

/// Fixed-width RFC 3339 so that text ordering in SQL equals time ordering.
fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ContactLinkError::StoreUnavailable(format!("invalid timestamp '{raw}': {e}")))
}

/// Convert a database row to a [`Contact`].
fn row_to_contact(row: &libsql::Row) -> Result<Contact> {
    let precedence: String = row.get(4).map_err(ContactLinkError::store)?;
    Ok(Contact {
        id: ContactId(row.get::<i64>(0).map_err(ContactLinkError::store)?),
        phone_number: row.get::<String>(1).ok(),
        email: row.get::<String>(2).ok(),
        linked_id: row.get::<i64>(3).ok().map(ContactId),
        link_precedence: precedence
            .parse::<LinkPrecedence>()
            .map_err(ContactLinkError::StoreUnavailable)?,
        created_at: parse_timestamp(&row.get::<String>(5).map_err(ContactLinkError::store)?)?,
        updated_at: parse_timestamp(&row.get::<String>(6).map_err(ContactLinkError::store)?)?,
        deleted_at: row
            .get::<String>(7)
            .ok()
            .map(|raw| parse_timestamp(&raw))
            .transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    /// Create a temp file store for testing.
    async fn test_store() -> LibsqlStore {
        let tmp = std::env::temp_dir().join(format!("contactlink_test_{}.db", Uuid::now_v7()));
        LibsqlStore::open(&tmp).await.expect("open test db")
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let store = test_store().await;
        assert_eq!(store.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("contactlink_test_{}.db", Uuid::now_v7()));
        let s1 = LibsqlStore::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = LibsqlStore::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn create_assigns_monotonic_ids() {
        store::conformance::create_assigns_monotonic_ids(&test_store().await).await;
    }

    #[tokio::test]
    async fn lookup_matches_either_field() {
        store::conformance::lookup_matches_either_field(&test_store().await).await;
    }

    #[tokio::test]
    async fn cluster_anchor_is_single_hop() {
        store::conformance::cluster_anchor_is_single_hop(&test_store().await).await;
    }

    #[tokio::test]
    async fn update_relinks_and_bumps_timestamp() {
        store::conformance::update_relinks_and_bumps_timestamp(&test_store().await).await;
    }

    #[tokio::test]
    async fn closed_store_rejects_calls() {
        let store = LibsqlStore::open_in_memory().await.expect("open in memory");
        store::conformance::closed_store_rejects_calls(&store).await;
    }

    #[tokio::test]
    async fn rows_survive_reopen() {
        let tmp = std::env::temp_dir().join(format!("contactlink_test_{}.db", Uuid::now_v7()));
        let id = {
            let store = LibsqlStore::open(&tmp).await.unwrap();
            store
                .create(NewContact {
                    email: Some("lorraine@hillvalley.edu".into()),
                    phone_number: Some("123456".into()),
                    link: ContactLink::Primary,
                })
                .await
                .unwrap()
        };

        let store = LibsqlStore::open(&tmp).await.unwrap();
        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, id);
        assert_eq!(all[0].email.as_deref(), Some("lorraine@hillvalley.edu"));
    }

    #[tokio::test]
    async fn soft_deleted_rows_are_hidden() {
        let store = test_store().await;
        let a = store
            .create(NewContact {
                email: Some("a@x".into()),
                phone_number: Some("1".into()),
                link: ContactLink::Primary,
            })
            .await
            .unwrap();
        let b = store
            .create(NewContact {
                email: Some("b@x".into()),
                phone_number: Some("1".into()),
                link: ContactLink::Secondary(a),
            })
            .await
            .unwrap();

        store.soft_delete(b).await.expect("soft delete");

        let by_phone = store.find_by_email_or_phone(None, Some("1")).await.unwrap();
        assert_eq!(by_phone.iter().map(|c| c.id).collect::<Vec<_>>(), vec![a]);
        assert_eq!(store.find_by_cluster_anchor(a).await.unwrap().len(), 1);
        assert_eq!(store.list_all().await.unwrap().len(), 1);

        let err = store.update(b, ContactLink::Primary).await.unwrap_err();
        assert!(matches!(err, ContactLinkError::NotFound { .. }));
        assert!(store.soft_delete(b).await.is_err());
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("contactlink_test_{}.db", Uuid::now_v7()));
        let rw = LibsqlStore::open(&tmp).await.unwrap();
        rw.create(NewContact {
            email: Some("doc@hillvalley.edu".into()),
            phone_number: None,
            link: ContactLink::Primary,
        })
        .await
        .unwrap();
        drop(rw);

        let ro = LibsqlStore::open_readonly(&tmp).await.unwrap();
        assert_eq!(ro.list_all().await.unwrap().len(), 1);
        let result = ro
            .create(NewContact {
                email: Some("marty@hillvalley.edu".into()),
                phone_number: None,
                link: ContactLink::Primary,
            })
            .await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }

    #[test]
    fn timestamps_sort_lexically() {
        let early = DateTime::parse_from_rfc3339("2024-01-01T00:00:00.5Z")
            .unwrap()
            .with_timezone(&Utc);
        let late = DateTime::parse_from_rfc3339("2024-01-01T00:00:00.123456Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(late < early);
        assert!(format_timestamp(late) < format_timestamp(early));
        assert_eq!(parse_timestamp(&format_timestamp(early)).unwrap(), early);
    }
}
