use async_trait::async_trait;

use crate::outbox::{OutboxSink, StoreError};
use crate::users::{NewUser, User};

// ============================================================================
// Storage - transactional user store with co-located outbox
// ============================================================================
//
// A `UnitOfWork` is one open transaction. User mutations and outbox inserts
// made through it become visible together on `commit`; dropping it without
// committing rolls everything back.
//
// ============================================================================

mod memory;
mod postgres;

pub use memory::{MemoryStore, MemoryUnitOfWork, StoreOp};
pub use postgres::{PgStore, PgUnitOfWork};

#[async_trait]
pub trait UnitOfWork: OutboxSink {
    async fn find_user(&mut self, id: i64) -> Result<Option<User>, StoreError>;

    /// Like `find_user`, but the row stays locked until the transaction ends
    async fn find_user_for_update(&mut self, id: i64) -> Result<Option<User>, StoreError>;

    async fn find_user_by_email(&mut self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_user_by_external_id(&mut self, external_id: &str) -> Result<Option<User>, StoreError>;

    /// Ordered by id
    async fn list_users(&mut self) -> Result<Vec<User>, StoreError>;

    async fn insert_user(&mut self, user: NewUser) -> Result<User, StoreError>;

    /// `false` when the row no longer exists
    async fn update_user(&mut self, user: &User) -> Result<bool, StoreError>;

    /// `false` when the row no longer exists
    async fn delete_user(&mut self, id: i64) -> Result<bool, StoreError>;

    async fn commit(self) -> Result<(), StoreError>
    where
        Self: Sized;
}

#[async_trait]
pub trait TransactionalStore: Send + Sync {
    type Tx: UnitOfWork;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}
