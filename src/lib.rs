//! Transactional outbox for user domain events.
//!
//! User mutations and their events are committed in one database transaction
//! ([`users::UserService`] + [`outbox::OutboxWriter`]). The
//! [`outbox::OutboxRelay`] later drains pending outbox rows to a message
//! transport with at-least-once delivery, and [`consumer::IdempotentConsumer`]
//! makes the receiving side safe against the resulting redeliveries.

pub mod actors;
pub mod config;
pub mod consumer;
pub mod events;
pub mod messaging;
pub mod metrics;
pub mod outbox;
pub mod storage;
pub mod users;
pub mod utils;
