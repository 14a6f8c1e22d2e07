//! Storage for account and device metadata.
//!
//! This module provides:
//! - `connection`: scoped SQLite connections in write-ahead-log mode
//! - `schema`: the four table definitions
//! - `sqlite`: the SQLite implementation of [`RelationalStore`]
//!
//! Callers depend on the [`RelationalStore`] trait so that action flows can be
//! exercised against any implementation.

pub mod connection;
pub mod schema;
pub mod sqlite;

use crate::error::{StoreResult, WriteOutcome};
use crate::models::{Account, Thing};
use std::collections::BTreeMap;

/// Persistence interface for accounts and things.
///
/// Failure reporting is split by operation kind:
/// - Create and update methods return `Ok(WriteOutcome)`. A rejected write is
///   `WriteOutcome::Failed`, and callers must check
///   [`WriteOutcome::is_written`]. They return `Err` only when the store
///   cannot be reached.
/// - Read methods return `Err(StoreError::NotFound)` when no row matches.
///   They create any table they touch that is missing, so a store that was
///   never initialized reads as empty.
///
/// Update methods re-read the aggregate after the write and return that copy,
/// not an echo of their input.
///
/// [`StoreError::NotFound`]: crate::error::StoreError::NotFound
pub trait RelationalStore: Send + Sync {
    /// Creates all tables that do not exist yet.
    fn init(&self) -> StoreResult<()>;

    /// Creates a table from a raw column definition if it is absent.
    ///
    /// Raises `StoreError::Unavailable` if the database file does not exist
    /// after the attempt.
    fn create_table(&self, name: &str, definition: &str) -> StoreResult<WriteOutcome<()>>;

    /// Persists a new account. The passphrase column is written only when
    /// `persist_passphrase` is set.
    fn create_account(
        &self,
        account: &Account,
        persist_passphrase: bool,
    ) -> StoreResult<WriteOutcome<()>>;

    fn read_account(&self, account_ref: &str) -> StoreResult<Account>;

    /// Lists every account primary key.
    fn get_account_ids(&self) -> StoreResult<Vec<String>>;

    fn update_account_session(
        &self,
        account_ref: &str,
        token: &str,
        created_at: i64,
    ) -> StoreResult<WriteOutcome<Account>>;

    fn update_account_passphrase(
        &self,
        account_ref: &str,
        passphrase: &str,
    ) -> StoreResult<WriteOutcome<Account>>;

    /// Persists a thing together with all of its sensors and axes, as one
    /// transaction.
    fn create_thing(&self, thing: &Thing, linked_account_ref: &str)
        -> StoreResult<WriteOutcome<()>>;

    /// Reconstructs a thing aggregate.
    fn read_thing(&self, thing_id: &str) -> StoreResult<Thing>;

    /// Reconstructs every thing linked to an account, keyed by thing id.
    fn read_things_for_account(&self, account_ref: &str) -> StoreResult<BTreeMap<String, Thing>>;

    fn update_thing_token(&self, thing_id: &str, token: &str) -> StoreResult<WriteOutcome<Thing>>;
}
