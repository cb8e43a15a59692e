use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::config::{DEFAULT_CHAT_RETENTION, MIN_CHAT_RETENTION};
use crate::db::chat as queries;
use crate::db::{Database, CHAT_MIGRATIONS};
use crate::error::{AuditError, Result};
use crate::models::ConversationEntry;

/// Chat history per (project, vendor), kept in its own database file.
#[derive(Clone)]
pub struct ConversationStore {
    db: Arc<Mutex<Database>>,
    retention: usize,
}

impl ConversationStore {
    pub fn open(path: &Path, retention: usize) -> Result<Self> {
        Ok(ConversationStore::new(Database::open(path, CHAT_MIGRATIONS)?, retention))
    }

    pub fn new(db: Database, retention: usize) -> Self {
        ConversationStore {
            db: Arc::new(Mutex::new(db)),
            retention: retention.clamp(MIN_CHAT_RETENTION, DEFAULT_CHAT_RETENTION),
        }
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    fn lock(&self) -> Result<MutexGuard<'_, Database>> {
        self.db.lock().map_err(|_| AuditError::LockPoisoned("conversation"))
    }

    /// Appends one entry and trims the ledger to the retention cap, oldest first.
    pub fn save_chat_message(&self, project_id: &str, vendor_id: &str, entry: &ConversationEntry) -> Result<()> {
        let mut db = self.lock()?;
        let tx = db.write_transaction()?;
        queries::insert_message(&tx, project_id, vendor_id, entry)?;
        let trimmed = queries::trim_history(&tx, project_id, vendor_id, self.retention)?;
        tx.commit()?;

        debug!(project_id, vendor_id, role = ?entry.role, trimmed, "chat message saved");
        Ok(())
    }

    pub fn get_chat_history(&self, project_id: &str, vendor_id: &str) -> Result<Vec<ConversationEntry>> {
        let db = self.lock()?;
        Ok(queries::list_messages(db.conn(), project_id, vendor_id, None)?)
    }

    pub fn get_recent_history(
        &self,
        project_id: &str,
        vendor_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationEntry>> {
        let db = self.lock()?;
        Ok(queries::list_messages(db.conn(), project_id, vendor_id, Some(limit))?)
    }
}
