//! Contact lists and paged reads of list members.

use crate::error::DatabaseError;
use crate::types::{Contact, ContactId, ContactListId, ContactStatus};
use crate::{Error, Result};

use super::{ContactRow, Database};

impl From<ContactRow> for Contact {
    fn from(row: ContactRow) -> Self {
        Contact {
            id: ContactId(row.id),
            list_id: ContactListId(row.list_id),
            email: row.email,
            name: row.name,
            status: ContactStatus::from_i32(row.status),
        }
    }
}

impl Database {
    /// Create a contact list
    pub async fn insert_contact_list(&self, name: &str) -> Result<ContactListId> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query("INSERT INTO contact_lists (name, created_at) VALUES (?, ?)")
            .bind(name)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to insert contact list: {}",
                    e
                )))
            })?;

        Ok(ContactListId(result.last_insert_rowid()))
    }

    /// Add a contact to a list
    pub async fn insert_contact(
        &self,
        list_id: ContactListId,
        email: &str,
        name: Option<&str>,
        status: ContactStatus,
    ) -> Result<ContactId> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO contacts (list_id, email, name, status, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(list_id)
        .bind(email)
        .bind(name)
        .bind(status.to_i32())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert contact: {}",
                e
            )))
        })?;

        Ok(ContactId(result.last_insert_rowid()))
    }

    /// Bulk-add active contacts in one transaction (used by seeding and tests)
    pub async fn insert_contacts(
        &self,
        list_id: ContactListId,
        contacts: &[(String, Option<String>)],
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        for (email, name) in contacts {
            sqlx::query(
                r#"
                INSERT INTO contacts (list_id, email, name, status, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(list_id)
            .bind(email)
            .bind(name)
            .bind(ContactStatus::Active.to_i32())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to insert contact: {}",
                    e
                )))
            })?;
        }

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit contacts: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Change a contact's delivery status
    pub async fn set_contact_status(&self, id: ContactId, status: ContactStatus) -> Result<()> {
        sqlx::query("UPDATE contacts SET status = ? WHERE id = ?")
            .bind(status.to_i32())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set contact status: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Read up to `limit` members of a list, skipping the first `offset`, in
    /// primary-key order
    ///
    /// Every member is returned whatever its status, so a position in the
    /// list stays put when a contact bounces or unsubscribes. Callers skip
    /// contacts that are not deliverable.
    pub async fn fetch_list_contacts(
        &self,
        list_id: ContactListId,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<Contact>> {
        let rows = sqlx::query_as::<_, ContactRow>(
            r#"
            SELECT id, list_id, email, name, status
            FROM contacts
            WHERE list_id = ?
            ORDER BY id ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(list_id)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to fetch contacts: {}",
                e
            )))
        })?;

        Ok(rows.into_iter().map(Contact::from).collect())
    }

    /// Number of members of a list, any status
    pub async fn count_list_contacts(&self, list_id: ContactListId) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM contacts WHERE list_id = ?")
            .bind(list_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count contacts: {}",
                    e
                )))
            })?;

        Ok(count.max(0) as u64)
    }

    /// Number of deliverable contacts in a list right now
    pub async fn count_deliverable_contacts(&self, list_id: ContactListId) -> Result<u64> {
        self.count_deliverable_contacts_from(list_id, 0).await
    }

    /// Number of deliverable contacts at list position `offset` or later
    pub async fn count_deliverable_contacts_from(
        &self,
        list_id: ContactListId,
        offset: u64,
    ) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM (
                SELECT status FROM contacts
                WHERE list_id = ?
                ORDER BY id ASC
                LIMIT -1 OFFSET ?
            )
            WHERE status = ?
            "#,
        )
        .bind(list_id)
        .bind(offset as i64)
        .bind(ContactStatus::Active.to_i32())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to count contacts: {}",
                e
            )))
        })?;

        Ok(count.max(0) as u64)
    }
}
