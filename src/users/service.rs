use std::sync::Arc;

use crate::events::{UserCreated, UserDeleted, UserEmailUpdated, UserEvent, UserRegistered, UserUpdated};
use crate::outbox::OutboxWriter;
use crate::storage::{TransactionalStore, UnitOfWork};

use super::errors::ServiceError;
use super::model::{NewUser, User};

// ============================================================================
// User Service
// ============================================================================
//
// Every mutating operation runs in one unit of work: the user row change and
// its outbox entry commit together, or neither does. Any error returned
// before `commit` drops the unit of work, which rolls it back.
//
// ============================================================================

pub struct UserService<S: TransactionalStore> {
    store: Arc<S>,
    outbox: OutboxWriter,
}

impl<S: TransactionalStore> Clone for UserService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            outbox: self.outbox,
        }
    }
}

impl<S: TransactionalStore> UserService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            outbox: OutboxWriter::new(),
        }
    }

    pub async fn create_user(&self, user: NewUser) -> Result<User, ServiceError> {
        validate_email(&user.email)?;
        validate_name(&user.name)?;

        let mut tx = self.store.begin().await?;

        if tx.find_user_by_email(&user.email).await?.is_some() {
            return Err(ServiceError::Conflict(format!("email already registered: {}", user.email)));
        }

        let user = tx.insert_user(user).await?;
        let event = UserEvent::from(UserCreated::new(user.id, &user.email, &user.name));
        self.outbox.save(&mut tx, &event).await?;
        tx.commit().await?;

        tracing::info!(user_id = user.id, "👤 User created");
        Ok(user)
    }

    /// Make sure a local user exists for an identity-provider subject.
    ///
    /// Known subjects are returned unchanged without emitting anything.
    pub async fn sync_user(
        &self,
        external_id: &str,
        email: &str,
        name: Option<&str>,
    ) -> Result<User, ServiceError> {
        self.ensure_user(external_id, email, name).await.map(|(user, _)| user)
    }

    /// `sync_user`, also reporting whether the row was created by this call
    pub async fn ensure_user(
        &self,
        external_id: &str,
        email: &str,
        name: Option<&str>,
    ) -> Result<(User, bool), ServiceError> {
        if external_id.trim().is_empty() {
            return Err(ServiceError::Validation("external id must not be empty".to_string()));
        }
        validate_email(email)?;

        let mut tx = self.store.begin().await?;

        if let Some(existing) = tx.find_user_by_external_id(external_id).await? {
            return Ok((existing, false));
        }

        let name = name.filter(|n| !n.trim().is_empty()).unwrap_or(email);
        let user = tx
            .insert_user(NewUser::new(email, name).with_external_id(external_id))
            .await?;
        let event = UserEvent::from(UserCreated::new(user.id, &user.email, &user.name));
        self.outbox.save(&mut tx, &event).await?;
        tx.commit().await?;

        tracing::info!(user_id = user.id, external_id, "👤 User synced from identity provider");
        Ok((user, true))
    }

    pub async fn update_user_name(&self, id: i64, name: &str) -> Result<User, ServiceError> {
        validate_name(name)?;

        let mut tx = self.store.begin().await?;

        let mut user = tx
            .find_user_for_update(id)
            .await?
            .ok_or(ServiceError::NotFound(id))?;
        user.name = name.to_string();
        if !tx.update_user(&user).await? {
            return Err(ServiceError::NotFound(id));
        }

        let event = UserEvent::from(UserUpdated::new(user.id, &user.email, &user.name));
        self.outbox.save(&mut tx, &event).await?;
        tx.commit().await?;

        tracing::info!(user_id = id, "User updated");
        Ok(user)
    }

    pub async fn delete_user(&self, id: i64) -> Result<(), ServiceError> {
        let mut tx = self.store.begin().await?;

        if !tx.delete_user(id).await? {
            return Err(ServiceError::NotFound(id));
        }

        self.outbox
            .save(&mut tx, &UserEvent::from(UserDeleted::new(id)))
            .await?;
        tx.commit().await?;

        tracing::info!(user_id = id, "User deleted");
        Ok(())
    }

    /// Identity-side registration. Only the event is recorded; the local row
    /// is created when `LocalUserProjection` consumes it.
    pub async fn register_user(&self, external_id: &str, email: &str, name: &str) -> Result<(), ServiceError> {
        if external_id.trim().is_empty() {
            return Err(ServiceError::Validation("external id must not be empty".to_string()));
        }
        validate_email(email)?;
        validate_name(name)?;

        let mut tx = self.store.begin().await?;
        let event = UserEvent::from(UserRegistered::new(external_id, email, name));
        self.outbox.save(&mut tx, &event).await?;
        tx.commit().await?;

        tracing::info!(external_id, "User registration recorded");
        Ok(())
    }

    /// Identity-side email change; also updates the local row when one exists
    pub async fn change_email(&self, external_id: &str, new_email: &str) -> Result<(), ServiceError> {
        validate_email(new_email)?;

        let mut tx = self.store.begin().await?;

        if let Some(mut user) = tx.find_user_by_external_id(external_id).await? {
            user.email = new_email.to_string();
            // A concurrently deleted row has nothing left to update
            tx.update_user(&user).await?;
        }

        let event = UserEvent::from(UserEmailUpdated::new(external_id, new_email));
        self.outbox.save(&mut tx, &event).await?;
        tx.commit().await?;

        tracing::info!(external_id, "User email change recorded");
        Ok(())
    }

    /// Apply an email change made at the identity provider to the local row.
    ///
    /// The identity side already published the change, so no event is
    /// recorded. Returns `None` when no local user has this external id.
    pub async fn update_email_by_external_id(
        &self,
        external_id: &str,
        new_email: &str,
    ) -> Result<Option<User>, ServiceError> {
        validate_email(new_email)?;

        let mut tx = self.store.begin().await?;

        let Some(mut user) = tx.find_user_by_external_id(external_id).await? else {
            tracing::warn!(external_id, "No local user for email change");
            return Ok(None);
        };
        if user.email == new_email {
            return Ok(Some(user));
        }

        user.email = new_email.to_string();
        if !tx.update_user(&user).await? {
            return Ok(None);
        }
        tx.commit().await?;

        tracing::info!(user_id = user.id, external_id, "User email updated from identity provider");
        Ok(Some(user))
    }

    pub async fn find_user(&self, id: i64) -> Result<User, ServiceError> {
        let mut tx = self.store.begin().await?;
        tx.find_user(id).await?.ok_or(ServiceError::NotFound(id))
    }

    pub async fn list_users(&self) -> Result<Vec<User>, ServiceError> {
        let mut tx = self.store.begin().await?;
        Ok(tx.list_users().await?)
    }
}

fn validate_email(email: &str) -> Result<(), ServiceError> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(ServiceError::Validation(format!("invalid email: {email:?}")));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), ServiceError> {
    if name.trim().is_empty() {
        return Err(ServiceError::Validation("name must not be empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::decode;
    use crate::outbox::OutboxStatus;
    use crate::storage::{MemoryStore, StoreOp};

    fn service() -> (MemoryStore, UserService<MemoryStore>) {
        let store = MemoryStore::new();
        (store.clone(), UserService::new(Arc::new(store)))
    }

    #[tokio::test]
    async fn test_create_user_writes_row_and_event_together() {
        let (store, service) = service();

        let user = service
            .create_user(NewUser::new("a@example.com", "A"))
            .await
            .unwrap();

        let entries = store.outbox_entries().await;
        assert_eq!(store.users().await, vec![user.clone()]);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, OutboxStatus::Pending);
        assert_eq!(entries[0].aggregate_id, user.id.to_string());

        let event = decode(&entries[0].event_type, &entries[0].payload).unwrap();
        assert!(matches!(event, UserEvent::Created(e) if e.email == "a@example.com"));
    }

    #[tokio::test]
    async fn test_failed_commit_persists_neither_row_nor_event() {
        let (store, service) = service();
        store.fail_next(StoreOp::Commit).await;

        let err = service
            .create_user(NewUser::new("a@example.com", "A"))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Store(_)));
        assert!(store.users().await.is_empty());
        assert!(store.outbox_entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_outbox_insert_rolls_back_user() {
        let (store, service) = service();
        store.fail_next(StoreOp::InsertOutbox).await;

        let err = service
            .create_user(NewUser::new("a@example.com", "A"))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Outbox(_)));
        assert!(store.users().await.is_empty());
        assert!(store.outbox_entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_email_is_conflict() {
        let (store, service) = service();
        service.create_user(NewUser::new("a@example.com", "A")).await.unwrap();

        let err = service
            .create_user(NewUser::new("a@example.com", "Other"))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Conflict(_)));
        assert_eq!(store.outbox_entries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_validation_rejects_bad_input() {
        let (_, service) = service();

        for (email, name) in [("", "A"), ("no-at-sign", "A"), ("a@example.com", "  ")] {
            let err = service.create_user(NewUser::new(email, name)).await.unwrap_err();
            assert!(matches!(err, ServiceError::Validation(_)), "{email:?} / {name:?}");
        }
    }

    #[tokio::test]
    async fn test_sync_user_is_idempotent_per_external_id() {
        let (store, service) = service();

        let first = service.sync_user("kc-1", "a@example.com", None).await.unwrap();
        let second = service
            .sync_user("kc-1", "changed@example.com", Some("Changed"))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.name, "a@example.com");
        assert_eq!(store.outbox_entries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_update_and_delete_emit_events() {
        let (store, service) = service();
        let user = service.create_user(NewUser::new("a@example.com", "A")).await.unwrap();

        let updated = service.update_user_name(user.id, "B").await.unwrap();
        service.delete_user(user.id).await.unwrap();

        let event_types: Vec<String> = store
            .outbox_entries()
            .await
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(updated.name, "B");
        assert_eq!(event_types, vec!["USER_CREATED", "USER_UPDATED", "USER_DELETED"]);
        assert!(store.users().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_user_is_not_found_and_emits_nothing() {
        let (store, service) = service();

        assert!(matches!(service.update_user_name(42, "X").await, Err(ServiceError::NotFound(42))));
        assert!(matches!(service.delete_user(42).await, Err(ServiceError::NotFound(42))));
        assert!(matches!(service.find_user(42).await, Err(ServiceError::NotFound(42))));
        assert!(store.outbox_entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_change_email_updates_local_row_and_emits() {
        let (store, service) = service();
        let user = service.sync_user("kc-7", "old@example.com", Some("Old")).await.unwrap();

        service.change_email("kc-7", "new@example.com").await.unwrap();
        service.change_email("kc-unknown", "x@example.com").await.unwrap();

        assert_eq!(service.find_user(user.id).await.unwrap().email, "new@example.com");
        let event_types: Vec<String> = store
            .outbox_entries()
            .await
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(
            event_types,
            vec!["USER_CREATED", "USER_EMAIL_UPDATED", "USER_EMAIL_UPDATED"]
        );
    }

    #[tokio::test]
    async fn test_update_email_by_external_id_records_no_event() {
        let (store, service) = service();
        let user = service.sync_user("kc-9", "old@example.com", Some("Nine")).await.unwrap();

        let updated = service
            .update_email_by_external_id("kc-9", "new@example.com")
            .await
            .unwrap();
        let missing = service
            .update_email_by_external_id("kc-unknown", "x@example.com")
            .await
            .unwrap();

        assert_eq!(updated.map(|u| u.email), Some("new@example.com".to_string()));
        assert_eq!(missing, None);
        assert_eq!(service.find_user(user.id).await.unwrap().email, "new@example.com");
        assert_eq!(store.outbox_entries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_update_racing_a_delete_is_rejected() {
        let (store, service) = service();
        let user = service.create_user(NewUser::new("a@example.com", "A")).await.unwrap();

        let mut updater = store.begin().await.unwrap();
        let mut renamed = updater.find_user_for_update(user.id).await.unwrap().unwrap();
        renamed.name = "B".to_string();
        updater.update_user(&renamed).await.unwrap();

        service.delete_user(user.id).await.unwrap();
        let err = ServiceError::from(updater.commit().await.unwrap_err());

        assert!(matches!(err, ServiceError::Conflict(_)));
        assert!(store.users().await.is_empty());
        assert!(matches!(service.delete_user(user.id).await, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_register_user_records_event_only() {
        let (store, service) = service();

        service.register_user("kc-3", "r@example.com", "R").await.unwrap();

        assert!(service.list_users().await.unwrap().is_empty());
        let entries = store.outbox_entries().await;
        assert_eq!(entries[0].event_type, "USER_REGISTERED");
        assert_eq!(entries[0].aggregate_id, "kc-3");
    }
}
