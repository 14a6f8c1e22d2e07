//! Account and device aggregates persisted by the store.
//!
//! A [`Thing`] owns its [`Sensor`]s, and each sensor owns its [`SensorAxis`]
//! definitions. Both levels are keyed maps, so axis names are unique within a
//! sensor and sensor names unique within a thing by construction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single measured dimension of a sensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorAxis {
    pub axis_name: String,
    pub user_defined_type: String,
    pub data_type: String,
}

impl SensorAxis {
    pub fn new(
        axis_name: impl Into<String>,
        user_defined_type: impl Into<String>,
        data_type: impl Into<String>,
    ) -> Self {
        Self {
            axis_name: axis_name.into(),
            user_defined_type: user_defined_type.into(),
            data_type: data_type.into(),
        }
    }
}

/// A named measurement channel of a thing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sensor {
    pub sensor_name: String,
    pub description: String,
    /// Axis definitions keyed by axis name
    pub axes: BTreeMap<String, SensorAxis>,
}

impl Sensor {
    pub fn new(sensor_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            sensor_name: sensor_name.into(),
            description: description.into(),
            axes: BTreeMap::new(),
        }
    }

    /// Adds an axis, replacing any earlier axis with the same name.
    pub fn add_axis(&mut self, axis: SensorAxis) {
        self.axes.insert(axis.axis_name.clone(), axis);
    }

    pub fn with_axis(mut self, axis: SensorAxis) -> Self {
        self.add_axis(axis);
        self
    }

    pub fn axis_names(&self) -> impl Iterator<Item = &str> {
        self.axes.keys().map(String::as_str)
    }
}

/// A registered device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thing {
    pub thing_id: String,
    pub name: String,
    pub description: String,
    /// Free-form metadata, persisted as a JSON text column
    pub metadata: serde_json::Value,
    /// Device token issued by the remote service, if one was obtained
    pub token: Option<String>,
    /// Sensor definitions keyed by sensor name
    pub sensors: BTreeMap<String, Sensor>,
}

impl Thing {
    pub fn new(
        thing_id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            thing_id: thing_id.into(),
            name: name.into(),
            description: description.into(),
            metadata: serde_json::Value::Object(Default::default()),
            token: None,
            sensors: BTreeMap::new(),
        }
    }

    pub fn add_sensor(&mut self, sensor: Sensor) {
        self.sensors.insert(sensor.sensor_name.clone(), sensor);
    }

    pub fn with_sensor(mut self, sensor: Sensor) -> Self {
        self.add_sensor(sensor);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn sensor(&self, sensor_name: &str) -> Option<&Sensor> {
        self.sensors.get(sensor_name)
    }
}

/// A root account on the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub account_ref: String,
    pub email: String,
    pub display_name: String,
    /// Stored in plain text, and only when the caller opts in
    pub passphrase: Option<String>,
    pub session_token: Option<String>,
    /// Unix timestamp in seconds of the session token's creation
    pub session_created_at: Option<i64>,
}

impl Account {
    pub fn new(
        account_ref: impl Into<String>,
        email: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            account_ref: account_ref.into(),
            email: email.into(),
            display_name: display_name.into(),
            passphrase: None,
            session_token: None,
            session_created_at: None,
        }
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    pub fn has_session(&self) -> bool {
        self.session_token.is_some()
    }
}
