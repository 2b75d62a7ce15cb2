use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::outbox::{
    failed_reason, NewOutboxEntry, OutboxEntry, OutboxSink, OutboxStatus, OutboxStore, StoreError,
};
use crate::users::{NewUser, User};

use super::{TransactionalStore, UnitOfWork};

// ============================================================================
// In-memory Store
// ============================================================================
//
// Same contract as the Postgres store, for tests and the memory profile.
// A unit of work edits a private copy of the users table and buffers outbox
// rows; commit validates and applies both under one lock. Updating or
// deleting a row that another transaction deleted in the meantime fails the
// commit with `StoreError::Conflict`.
//
// Faults can be armed per operation with `fail_next`; the next call of that
// operation fails once with `StoreError::Unavailable`.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    InsertOutbox,
    Commit,
    FindUnprocessed,
    MarkProcessed,
    IncrementAttempt,
    MarkFailed,
}

#[derive(Default)]
struct State {
    users: BTreeMap<i64, User>,
    outbox: Vec<OutboxEntry>,
    faults: HashSet<StoreOp>,
}

impl State {
    fn take_fault(&mut self, op: StoreOp) -> Result<(), StoreError> {
        if self.faults.remove(&op) {
            return Err(StoreError::Unavailable(format!("injected {op:?} failure")));
        }
        Ok(())
    }

    fn pending_mut(&mut self, id: Uuid) -> Option<&mut OutboxEntry> {
        self.outbox
            .iter_mut()
            .find(|e| e.id == id && e.status == OutboxStatus::Pending)
    }
}

#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    next_user_id: Arc<AtomicI64>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            next_user_id: Arc::new(AtomicI64::new(1)),
        }
    }

    /// Arm a one-shot failure for the next call of `op`
    pub async fn fail_next(&self, op: StoreOp) {
        self.state.lock().await.faults.insert(op);
    }

    /// Insert a row as-is, bypassing any transaction
    pub async fn seed_entry(&self, entry: OutboxEntry) {
        self.state.lock().await.outbox.push(entry);
    }

    /// All rows, oldest first
    pub async fn outbox_entries(&self) -> Vec<OutboxEntry> {
        let mut entries = self.state.lock().await.outbox.clone();
        entries.sort_by_key(|e| e.created_at);
        entries
    }

    pub async fn outbox_entry(&self, id: Uuid) -> Option<OutboxEntry> {
        self.state
            .lock()
            .await
            .outbox
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    pub async fn users(&self) -> Vec<User> {
        self.state.lock().await.users.values().cloned().collect()
    }
}

#[async_trait]
impl TransactionalStore for MemoryStore {
    type Tx = MemoryUnitOfWork;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let users = self.state.lock().await.users.clone();
        Ok(MemoryUnitOfWork {
            state: self.state.clone(),
            next_user_id: self.next_user_id.clone(),
            users,
            inserted: HashSet::new(),
            deleted: HashSet::new(),
            touched: HashSet::new(),
            outbox: Vec::new(),
        })
    }
}

#[async_trait]
impl OutboxStore for MemoryStore {
    async fn find_unprocessed(&self, batch_size: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        let mut state = self.state.lock().await;
        state.take_fault(StoreOp::FindUnprocessed)?;

        let mut pending: Vec<OutboxEntry> = state
            .outbox
            .iter()
            .filter(|e| e.status == OutboxStatus::Pending)
            .cloned()
            .collect();
        // Stable: equal timestamps keep insertion order
        pending.sort_by_key(|e| e.created_at);
        pending.truncate(batch_size);
        Ok(pending)
    }

    async fn mark_as_processed(&self, ids: &[Uuid]) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.take_fault(StoreOp::MarkProcessed)?;

        let now = Utc::now();
        for id in ids {
            if let Some(entry) = state.pending_mut(*id) {
                entry.status = OutboxStatus::Processed;
                entry.processed_at = Some(now);
            }
        }
        Ok(())
    }

    async fn increment_attempt(&self, id: Uuid, last_error: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.take_fault(StoreOp::IncrementAttempt)?;

        if let Some(entry) = state.pending_mut(id) {
            entry.attempts += 1;
            entry.last_error = Some(last_error.to_string());
        }
        Ok(())
    }

    async fn mark_as_failed(&self, id: Uuid, reason: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.take_fault(StoreOp::MarkFailed)?;

        if let Some(entry) = state.pending_mut(id) {
            entry.status = OutboxStatus::Failed;
            entry.last_error = Some(failed_reason(reason));
        }
        Ok(())
    }
}

pub struct MemoryUnitOfWork {
    state: Arc<Mutex<State>>,
    next_user_id: Arc<AtomicI64>,
    /// Working copy of the users table as seen by this transaction
    users: BTreeMap<i64, User>,
    inserted: HashSet<i64>,
    deleted: HashSet<i64>,
    /// Ids inserted or updated in this transaction
    touched: HashSet<i64>,
    outbox: Vec<NewOutboxEntry>,
}

impl MemoryUnitOfWork {
    fn check_unique(&self, candidate: &User) -> Result<(), StoreError> {
        check_unique(self.users.values(), candidate)
    }
}

fn check_unique<'a>(
    users: impl Iterator<Item = &'a User>,
    candidate: &User,
) -> Result<(), StoreError> {
    for existing in users.filter(|u| u.id != candidate.id) {
        if existing.email == candidate.email {
            return Err(StoreError::UniqueViolation(format!("users.email = {}", candidate.email)));
        }
        if existing.external_id.is_some() && existing.external_id == candidate.external_id {
            return Err(StoreError::UniqueViolation(format!(
                "users.external_id = {}",
                candidate.external_id.as_deref().unwrap_or_default()
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl OutboxSink for MemoryUnitOfWork {
    async fn insert_outbox_entry(&mut self, entry: NewOutboxEntry) -> Result<(), StoreError> {
        self.state.lock().await.take_fault(StoreOp::InsertOutbox)?;
        self.outbox.push(entry);
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn find_user(&mut self, id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.users.get(&id).cloned())
    }

    async fn find_user_for_update(&mut self, id: i64) -> Result<Option<User>, StoreError> {
        self.find_user(id).await
    }

    async fn find_user_by_email(&mut self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_user_by_external_id(&mut self, external_id: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .users
            .values()
            .find(|u| u.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn list_users(&mut self) -> Result<Vec<User>, StoreError> {
        Ok(self.users.values().cloned().collect())
    }

    async fn insert_user(&mut self, user: NewUser) -> Result<User, StoreError> {
        let user = user.with_id(self.next_user_id.fetch_add(1, Ordering::SeqCst));
        self.check_unique(&user)?;

        self.inserted.insert(user.id);
        self.touched.insert(user.id);
        self.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_user(&mut self, user: &User) -> Result<bool, StoreError> {
        if !self.users.contains_key(&user.id) {
            return Ok(false);
        }
        self.check_unique(user)?;

        self.touched.insert(user.id);
        self.users.insert(user.id, user.clone());
        Ok(true)
    }

    async fn delete_user(&mut self, id: i64) -> Result<bool, StoreError> {
        if self.users.remove(&id).is_none() {
            return Ok(false);
        }
        self.touched.remove(&id);
        if !self.inserted.remove(&id) {
            self.deleted.insert(id);
        }
        Ok(true)
    }

    async fn commit(self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.take_fault(StoreOp::Commit)?;

        // Rows this transaction saw but someone else has since deleted
        let vanished = self
            .deleted
            .iter()
            .chain(self.touched.difference(&self.inserted))
            .find(|id| !state.users.contains_key(id));
        if let Some(id) = vanished {
            return Err(StoreError::Conflict(format!("users.id = {id} was deleted concurrently")));
        }

        // Apply to a copy first so a conflict leaves the store untouched
        let mut users = state.users.clone();
        for id in &self.deleted {
            users.remove(id);
        }
        for id in &self.touched {
            if let Some(user) = self.users.get(id) {
                users.insert(*id, user.clone());
            }
        }
        for id in &self.touched {
            if let Some(user) = users.get(id) {
                check_unique(users.values(), user)?;
            }
        }

        state.users = users;
        state
            .outbox
            .extend(self.outbox.into_iter().map(NewOutboxEntry::into_pending));
        Ok(())
    }
}
