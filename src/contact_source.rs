//! Chunked reads over a contact list.
//!
//! Contacts are read in primary-key order, `chunk_size` at a time, so a list
//! is never loaded into memory whole. The offset is a position among all
//! members of the list, whatever their status, so a contact that bounces or
//! unsubscribes after it was sent to does not move later positions. Chunks
//! carry every member; senders skip the ones that are not deliverable.
//! Contacts added while a send is running land after the cursor and may or
//! may not be reached.

use crate::db::Database;
use crate::error::Result;
use crate::types::{Contact, ContactListId};

/// Paged access to list members, enabling testability.
#[async_trait::async_trait]
pub trait ContactStore: Send + Sync {
    /// Up to `limit` members of `list_id`, any status, skipping `offset`
    async fn fetch_members(
        &self,
        list_id: ContactListId,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<Contact>>;

    /// Number of members of `list_id`, any status
    async fn count_members(&self, list_id: ContactListId) -> Result<u64>;

    /// Number of deliverable contacts of `list_id` at position `offset` or later
    async fn count_deliverable_from(&self, list_id: ContactListId, offset: u64) -> Result<u64>;
}

#[async_trait::async_trait]
impl ContactStore for Database {
    async fn fetch_members(
        &self,
        list_id: ContactListId,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<Contact>> {
        self.fetch_list_contacts(list_id, offset, limit).await
    }

    async fn count_members(&self, list_id: ContactListId) -> Result<u64> {
        self.count_list_contacts(list_id).await
    }

    async fn count_deliverable_from(&self, list_id: ContactListId, offset: u64) -> Result<u64> {
        self.count_deliverable_contacts_from(list_id, offset).await
    }
}

/// Cursor over one list, yielding fixed-size chunks
pub struct ContactSource<'a> {
    store: &'a dyn ContactStore,
    list_id: ContactListId,
    offset: u64,
    chunk_size: usize,
    exhausted: bool,
}

impl<'a> ContactSource<'a> {
    /// Start reading `list_id` at `offset`
    pub fn new(
        store: &'a dyn ContactStore,
        list_id: ContactListId,
        offset: u64,
        chunk_size: usize,
    ) -> Self {
        Self {
            store,
            list_id,
            offset,
            chunk_size: chunk_size.max(1),
            exhausted: false,
        }
    }

    /// List position of the next unread member
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read the next chunk, or `None` once the list is exhausted
    ///
    /// A chunk shorter than `chunk_size` is the last one; no further query is
    /// issued after it.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<Contact>>> {
        if self.exhausted {
            return Ok(None);
        }

        let chunk = self
            .store
            .fetch_members(self.list_id, self.offset, self.chunk_size)
            .await?;

        tracing::debug!(
            list_id = self.list_id.0,
            offset = self.offset,
            count = chunk.len(),
            "Read contact chunk"
        );

        if chunk.len() < self.chunk_size {
            self.exhausted = true;
        }
        if chunk.is_empty() {
            return Ok(None);
        }

        self.offset += chunk.len() as u64;
        Ok(Some(chunk))
    }
}
