//! SQLite implementation of [`RelationalStore`].
//!
//! Each call opens its own connection through [`ConnectionManager`]. Thing
//! aggregates are written in a single transaction and read back with one
//! query for the thing row plus one join over sensors and axes.

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult, WriteOutcome};
use crate::models::{Account, Sensor, SensorAxis, Thing};
use crate::storage::connection::ConnectionManager;
use crate::storage::schema::{
    create_table_sql, ensure_table, ACCOUNT_TABLE, ALL_TABLES, THING_TABLES,
};
use crate::storage::RelationalStore;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

/// SQLite-backed store for accounts and things.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    connections: ConnectionManager,
}

impl SqliteStore {
    /// Creates a store for the configured database file. Nothing is opened
    /// until the first operation.
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            connections: ConnectionManager::new(config),
        }
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        self.connections.path()
    }

    /// Runs a write and converts engine errors into a failed outcome.
    fn write<T, F>(&self, operation: &'static str, f: F) -> StoreResult<WriteOutcome<T>>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<WriteOutcome<T>>,
    {
        self.connections.with_connection(|conn| {
            let outcome = f(conn).unwrap_or_else(WriteOutcome::failed);
            if let WriteOutcome::Failed { reason } = &outcome {
                warn!(operation, %reason, "write rejected");
            }
            Ok(outcome)
        })
    }

    /// Replaces a successful write with a fresh read of the aggregate.
    fn reread<T>(
        outcome: WriteOutcome<()>,
        read: impl FnOnce() -> StoreResult<T>,
    ) -> StoreResult<WriteOutcome<T>> {
        match outcome {
            WriteOutcome::Written(()) => Ok(WriteOutcome::Written(read()?)),
            WriteOutcome::Failed { reason } => Ok(WriteOutcome::Failed { reason }),
        }
    }
}

/// Fails the write when an update matched nothing.
fn require_changed(changed: usize, entity: &str, key: &str) -> WriteOutcome<()> {
    if changed == 0 {
        WriteOutcome::failed(format!("no {} with key {}", entity, key))
    } else {
        WriteOutcome::Written(())
    }
}

fn map_account_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        account_ref: row.get(0)?,
        email: row.get(1)?,
        display_name: row.get(2)?,
        passphrase: row.get(3)?,
        session_token: row.get(4)?,
        session_created_at: row.get(5)?,
    })
}

fn load_account(conn: &Connection, account_ref: &str) -> StoreResult<Account> {
    conn.query_row(
        "SELECT account_ref, email, display_name, passphrase, session_token, session_created_at \
         FROM account WHERE account_ref = ?1",
        [account_ref],
        map_account_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("account", account_ref))
}

/// Reads create missing tables too, so an uninitialized store reports no
/// rows instead of an engine error.
fn ensure_thing_tables(conn: &Connection) -> rusqlite::Result<()> {
    for table in THING_TABLES {
        ensure_table(conn, &table)?;
    }
    Ok(())
}

/// One row of the sensor/axis join. Axis columns are NULL for a sensor
/// without axes.
struct SensorAxisRow {
    sensor_name: String,
    sensor_description: Option<String>,
    axis_name: Option<String>,
    user_defined_type: Option<String>,
    data_type: Option<String>,
}

fn load_thing(conn: &Connection, thing_id: &str) -> StoreResult<Thing> {
    let (name, description, metadata, token) = conn
        .query_row(
            "SELECT name, description, metadata, token FROM thing_definition WHERE thing_id = ?1",
            [thing_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            },
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found("thing", thing_id))?;

    let metadata = match metadata {
        Some(text) => serde_json::from_str(&text)?,
        None => serde_json::Value::Null,
    };

    let mut thing = Thing {
        thing_id: thing_id.to_string(),
        name,
        description: description.unwrap_or_default(),
        metadata,
        token,
        sensors: BTreeMap::new(),
    };

    let mut stmt = conn.prepare(
        "SELECT s.sensor_name, s.description, a.axis_name, a.user_defined_type, a.data_type \
         FROM sensor_definition s \
         LEFT JOIN sensor_axis_definition a \
           ON a.linked_thing_id = s.linked_thing_id AND a.sensor_name = s.sensor_name \
         WHERE s.linked_thing_id = ?1 \
         ORDER BY s.sensor_name, a.axis_name",
    )?;
    let rows = stmt.query_map([thing_id], |row| {
        Ok(SensorAxisRow {
            sensor_name: row.get(0)?,
            sensor_description: row.get(1)?,
            axis_name: row.get(2)?,
            user_defined_type: row.get(3)?,
            data_type: row.get(4)?,
        })
    })?;

    for row in rows {
        let row = row?;
        let sensor = thing
            .sensors
            .entry(row.sensor_name.clone())
            .or_insert_with(|| {
                Sensor::new(
                    row.sensor_name.clone(),
                    row.sensor_description.clone().unwrap_or_default(),
                )
            });
        if let Some(axis_name) = row.axis_name {
            sensor.add_axis(SensorAxis::new(
                axis_name,
                row.user_defined_type.unwrap_or_default(),
                row.data_type.unwrap_or_default(),
            ));
        }
    }

    Ok(thing)
}

impl RelationalStore for SqliteStore {
    #[instrument(skip(self), fields(path = %self.path().display()))]
    fn init(&self) -> StoreResult<()> {
        self.connections.with_connection(|conn| {
            for table in ALL_TABLES {
                ensure_table(conn, &table)?;
            }
            Ok(())
        })?;
        info!("store initialized");
        Ok(())
    }

    #[instrument(skip(self, definition))]
    fn create_table(&self, name: &str, definition: &str) -> StoreResult<WriteOutcome<()>> {
        let outcome = self.write("create_table", |conn| {
            conn.execute_batch(&create_table_sql(name, definition))?;
            Ok(WriteOutcome::Written(()))
        })?;
        if !self.path().is_file() {
            return Err(StoreError::unavailable(
                self.path(),
                "database file missing after create_table",
            ));
        }
        Ok(outcome)
    }

    #[instrument(skip(self, account), fields(account_ref = %account.account_ref))]
    fn create_account(
        &self,
        account: &Account,
        persist_passphrase: bool,
    ) -> StoreResult<WriteOutcome<()>> {
        let passphrase = if persist_passphrase {
            account.passphrase.as_deref()
        } else {
            None
        };
        self.write("create_account", |conn| {
            ensure_table(conn, &ACCOUNT_TABLE)?;
            conn.execute(
                "INSERT INTO account \
                 (account_ref, email, display_name, passphrase, session_token, session_created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    account.account_ref,
                    account.email,
                    account.display_name,
                    passphrase,
                    account.session_token,
                    account.session_created_at,
                ],
            )?;
            Ok(WriteOutcome::Written(()))
        })
    }

    #[instrument(skip(self))]
    fn read_account(&self, account_ref: &str) -> StoreResult<Account> {
        self.connections.with_connection(|conn| {
            ensure_table(conn, &ACCOUNT_TABLE)?;
            load_account(conn, account_ref)
        })
    }

    #[instrument(skip(self))]
    fn get_account_ids(&self) -> StoreResult<Vec<String>> {
        self.connections.with_connection(|conn| {
            ensure_table(conn, &ACCOUNT_TABLE)?;
            let mut stmt = conn.prepare("SELECT account_ref FROM account ORDER BY account_ref")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(ids)
        })
    }

    #[instrument(skip(self, token))]
    fn update_account_session(
        &self,
        account_ref: &str,
        token: &str,
        created_at: i64,
    ) -> StoreResult<WriteOutcome<Account>> {
        let outcome = self.write("update_account_session", |conn| {
            let changed = conn.execute(
                "UPDATE account SET session_token = ?1, session_created_at = ?2 \
                 WHERE account_ref = ?3",
                params![token, created_at, account_ref],
            )?;
            Ok(require_changed(changed, "account", account_ref))
        })?;
        Self::reread(outcome, || self.read_account(account_ref))
    }

    #[instrument(skip(self, passphrase))]
    fn update_account_passphrase(
        &self,
        account_ref: &str,
        passphrase: &str,
    ) -> StoreResult<WriteOutcome<Account>> {
        let outcome = self.write("update_account_passphrase", |conn| {
            let changed = conn.execute(
                "UPDATE account SET passphrase = ?1 WHERE account_ref = ?2",
                params![passphrase, account_ref],
            )?;
            Ok(require_changed(changed, "account", account_ref))
        })?;
        Self::reread(outcome, || self.read_account(account_ref))
    }

    #[instrument(skip(self, thing), fields(thing_id = %thing.thing_id))]
    fn create_thing(
        &self,
        thing: &Thing,
        linked_account_ref: &str,
    ) -> StoreResult<WriteOutcome<()>> {
        let metadata = thing.metadata.to_string();
        self.write("create_thing", |conn| {
            let tx = conn.transaction()?;
            ensure_thing_tables(&tx)?;
            tx.execute(
                "INSERT INTO thing_definition \
                 (thing_id, linked_root_account_id, name, description, metadata, token) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    thing.thing_id,
                    linked_account_ref,
                    thing.name,
                    thing.description,
                    metadata,
                    thing.token,
                ],
            )?;
            {
                let mut sensor_stmt = tx.prepare(
                    "INSERT INTO sensor_definition (sensor_name, linked_thing_id, description) \
                     VALUES (?1, ?2, ?3)",
                )?;
                let mut axis_stmt = tx.prepare(
                    "INSERT INTO sensor_axis_definition \
                     (sensor_name, linked_thing_id, axis_name, user_defined_type, data_type) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for sensor in thing.sensors.values() {
                    sensor_stmt.execute(params![
                        sensor.sensor_name,
                        thing.thing_id,
                        sensor.description,
                    ])?;
                    for axis in sensor.axes.values() {
                        axis_stmt.execute(params![
                            sensor.sensor_name,
                            thing.thing_id,
                            axis.axis_name,
                            axis.user_defined_type,
                            axis.data_type,
                        ])?;
                    }
                }
            }
            tx.commit()?;
            debug!(sensors = thing.sensors.len(), "thing persisted");
            Ok(WriteOutcome::Written(()))
        })
    }

    #[instrument(skip(self))]
    fn read_thing(&self, thing_id: &str) -> StoreResult<Thing> {
        self.connections.with_connection(|conn| {
            ensure_thing_tables(conn)?;
            load_thing(conn, thing_id)
        })
    }

    #[instrument(skip(self))]
    fn read_things_for_account(&self, account_ref: &str) -> StoreResult<BTreeMap<String, Thing>> {
        self.connections.with_connection(|conn| {
            ensure_thing_tables(conn)?;
            let ids = {
                let mut stmt = conn.prepare(
                    "SELECT thing_id FROM thing_definition \
                     WHERE linked_root_account_id = ?1 ORDER BY thing_id",
                )?;
                let ids = stmt
                    .query_map([account_ref], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?;
                ids
            };

            let mut things = BTreeMap::new();
            for thing_id in ids {
                match load_thing(conn, &thing_id) {
                    Ok(thing) => {
                        things.insert(thing_id, thing);
                    }
                    // Removed between the id scan and the load.
                    Err(e) if e.is_not_found() => continue,
                    Err(e) => return Err(e),
                }
            }
            Ok(things)
        })
    }

    #[instrument(skip(self, token))]
    fn update_thing_token(&self, thing_id: &str, token: &str) -> StoreResult<WriteOutcome<Thing>> {
        let outcome = self.write("update_thing_token", |conn| {
            let changed = conn.execute(
                "UPDATE thing_definition SET token = ?1 WHERE thing_id = ?2",
                params![token, thing_id],
            )?;
            Ok(require_changed(changed, "thing", thing_id))
        })?;
        Self::reread(outcome, || self.read_thing(thing_id))
    }
}
