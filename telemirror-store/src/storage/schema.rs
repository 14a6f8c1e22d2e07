//! Table definitions for the local store.

use rusqlite::Connection;

/// Name and column list of one table, as passed to `CREATE TABLE IF NOT EXISTS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDefinition {
    pub name: &'static str,
    pub columns: &'static str,
}

pub const ACCOUNT_TABLE: TableDefinition = TableDefinition {
    name: "account",
    columns: "account_ref TEXT NOT NULL PRIMARY KEY, \
              email TEXT NOT NULL, \
              display_name TEXT NOT NULL, \
              passphrase TEXT, \
              session_token TEXT, \
              session_created_at INTEGER",
};

pub const THING_TABLE: TableDefinition = TableDefinition {
    name: "thing_definition",
    columns: "thing_id TEXT NOT NULL PRIMARY KEY, \
              linked_root_account_id TEXT NOT NULL, \
              name TEXT NOT NULL, \
              description TEXT, \
              metadata TEXT, \
              token TEXT",
};

pub const SENSOR_TABLE: TableDefinition = TableDefinition {
    name: "sensor_definition",
    columns: "sensor_name TEXT NOT NULL, \
              linked_thing_id TEXT NOT NULL, \
              description TEXT, \
              PRIMARY KEY (sensor_name, linked_thing_id)",
};

pub const SENSOR_AXIS_TABLE: TableDefinition = TableDefinition {
    name: "sensor_axis_definition",
    columns: "sensor_name TEXT NOT NULL, \
              linked_thing_id TEXT NOT NULL, \
              axis_name TEXT NOT NULL, \
              user_defined_type TEXT, \
              data_type TEXT, \
              PRIMARY KEY (sensor_name, linked_thing_id, axis_name)",
};

/// Every table the store uses, in creation order.
pub const ALL_TABLES: [TableDefinition; 4] =
    [ACCOUNT_TABLE, THING_TABLE, SENSOR_TABLE, SENSOR_AXIS_TABLE];

/// Tables making up the thing aggregate.
pub const THING_TABLES: [TableDefinition; 3] = [THING_TABLE, SENSOR_TABLE, SENSOR_AXIS_TABLE];

/// Builds the DDL statement for a table.
pub fn create_table_sql(name: &str, columns: &str) -> String {
    format!("CREATE TABLE IF NOT EXISTS \"{}\" ({})", name.replace('"', "\"\""), columns)
}

/// Creates the table if it does not exist yet.
pub fn ensure_table(conn: &Connection, table: &TableDefinition) -> rusqlite::Result<()> {
    conn.execute_batch(&create_table_sql(table.name, table.columns))
}

/// Returns true if a table with this name exists.
pub fn table_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}
