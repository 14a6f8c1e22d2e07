/*!
# telemirror-store: local persistence for mirrored IoT metadata

Stores root accounts and registered devices ("things") with their sensors and
sensor axes in a local SQLite database, so that query and authentication flows
can reuse them without asking the remote service again.

## Tables

| table | key | columns |
|---|---|---|
| `account` | `account_ref` | email, display_name, passphrase, session_token, session_created_at |
| `thing_definition` | `thing_id` | linked_root_account_id, name, description, metadata, token |
| `sensor_definition` | (`sensor_name`, `linked_thing_id`) | description |
| `sensor_axis_definition` | (`sensor_name`, `linked_thing_id`, `axis_name`) | user_defined_type, data_type |

## Usage

```rust,no_run
use telemirror_store::{RelationalStore, SqliteStore, StoreConfig};
use telemirror_store::models::{Sensor, SensorAxis, Thing};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let store = SqliteStore::new(&StoreConfig::new("/var/lib/telemirror", "telemirror.sqlite"));
    store.init()?;

    let thing = Thing::new("thing-001", "Weather Station", "roof")
        .with_sensor(Sensor::new("wind", "anemometer")
            .with_axis(SensorAxis::new("speed", "m/s", "decimal")));

    if !store.create_thing(&thing, "acct-1")?.is_written() {
        eprintln!("thing was not persisted");
    }

    let loaded = store.read_thing("thing-001")?;
    assert_eq!(loaded, thing);
    Ok(())
}
```

See [`storage::RelationalStore`] for how write failures and missing rows are
reported.
*/

pub mod config;
pub mod error;
pub mod models;
pub mod storage;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult, WriteOutcome};
pub use models::{Account, Sensor, SensorAxis, Thing};
pub use storage::{connection::ConnectionManager, sqlite::SqliteStore, RelationalStore};
