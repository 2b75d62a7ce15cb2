use async_trait::async_trait;

use crate::events::UserEvent;
use crate::outbox::{OutboxError, StoreError};
use crate::storage::TransactionalStore;
use crate::users::{ServiceError, UserService};

use super::errors::ConsumerError;
use super::projection::{ApplyOutcome, UserProjection};

// ============================================================================
// Local Users Projection
// ============================================================================
//
// Keeps the local users table in step with the identity provider:
// - a registration becomes a local user, upserted by external id
// - an email change updates the local row without publishing again
//
// The service's own events (created, updated, deleted) are ignored here.
//
// ============================================================================

pub struct LocalUserProjection<S: TransactionalStore> {
    users: UserService<S>,
}

impl<S: TransactionalStore> LocalUserProjection<S> {
    pub fn new(users: UserService<S>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl<S: TransactionalStore + 'static> UserProjection for LocalUserProjection<S> {
    async fn apply(&self, event: &UserEvent) -> Result<ApplyOutcome, ConsumerError> {
        match event {
            UserEvent::Registered(e) => {
                let (user, created) = self
                    .users
                    .ensure_user(&e.external_id, &e.email, Some(&e.name))
                    .await
                    .map_err(into_consumer_error)?;

                tracing::debug!(user_id = user.id, external_id = %e.external_id, created, "Registration applied");
                Ok(if created {
                    ApplyOutcome::Applied
                } else {
                    ApplyOutcome::Ignored
                })
            }
            UserEvent::EmailUpdated(e) => {
                let updated = self
                    .users
                    .update_email_by_external_id(&e.external_id, &e.new_email)
                    .await
                    .map_err(into_consumer_error)?;

                Ok(match updated {
                    Some(_) => ApplyOutcome::Applied,
                    None => ApplyOutcome::Ignored,
                })
            }
            UserEvent::Created(_) | UserEvent::Updated(_) | UserEvent::Deleted(_) => Ok(ApplyOutcome::Ignored),
        }
    }
}

/// A conflict means a concurrent writer got there first; retrying finds its row
fn into_consumer_error(err: ServiceError) -> ConsumerError {
    match err {
        ServiceError::Conflict(detail) => ConsumerError::ProjectionUnavailable(detail),
        ServiceError::Store(StoreError::CorruptRow { id, reason }) => {
            ConsumerError::ProjectionRejected(format!("corrupt row {id}: {reason}"))
        }
        ServiceError::Store(e) | ServiceError::Outbox(OutboxError::Store(e)) => {
            ConsumerError::ProjectionUnavailable(e.to_string())
        }
        other => ConsumerError::ProjectionRejected(other.to_string()),
    }
}
