//! Account and thing actions that call the remote service and mirror the
//! result into the local store.
//!
//! A remote failure leaves the aggregate untouched. A remote success followed
//! by a rejected local write still returns the updated aggregate, with an
//! [`ActionFailure::NotPersisted`] saying why it was not stored. Only an
//! unreachable store is raised as `Err`.
//!
//! Every action returns the in-memory aggregate, also after a confirmed
//! write. The stored copy can lack fields the flags kept out of the store,
//! such as a passphrase that is not persisted, and callers need those for
//! the next remote call.

use crate::error::{ActionFailure, BoxError};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemirror_store::{Account, RelationalStore, StoreResult, Thing, WriteOutcome};
use tracing::{info, instrument, warn};

/// Remote account and device registry.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Registers a root account and returns its reference.
    async fn register_account(
        &self,
        email: String,
        display_name: String,
        passphrase: String,
    ) -> Result<String, BoxError>;

    /// Returns a fresh session token.
    async fn authenticate(&self, account_ref: String, passphrase: String)
        -> Result<String, BoxError>;

    /// Registers a thing and returns the id assigned to it.
    async fn register_thing(&self, session_token: String, thing: Thing) -> Result<String, BoxError>;

    /// Issues a new access token for a thing.
    async fn thing_token(&self, session_token: String, thing_id: String)
        -> Result<String, BoxError>;

    async fn reset_passphrase(&self, account_ref: String, passphrase: String)
        -> Result<(), BoxError>;

    /// Activates a registered account with the token the service sent out.
    async fn activate_account(
        &self,
        account_ref: String,
        activation_token: String,
        passphrase: String,
    ) -> Result<(), BoxError>;

    /// Uploads one batch of readings and returns how many records the
    /// service captured.
    async fn log_readings(
        &self,
        session_token: String,
        thing_token: String,
        payload: ReadingsPayload,
    ) -> Result<u64, BoxError>;

    /// Returns the body of the health endpoint.
    async fn ping(&self) -> Result<Value, BoxError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AxisReadingPayload {
    pub axis_name: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SensorReadingsPayload {
    pub sensor_name: String,
    pub axis_readings: Vec<AxisReadingPayload>,
}

/// Upload body: `{"ReadingTimestamp": "...", "Sensors": [...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReadingsPayload {
    /// Unix seconds, sent as text
    pub reading_timestamp: String,
    pub sensors: Vec<SensorReadingsPayload>,
}

/// Readings waiting to be uploaded, keyed by sensor then axis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadingBatch {
    readings: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl ReadingBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sensor_name: &str, axis_name: &str, value: impl Into<String>) {
        self.readings
            .entry(sensor_name.to_string())
            .or_default()
            .entry(axis_name.to_string())
            .or_default()
            .push(value.into());
    }

    pub fn with_reading(mut self, sensor_name: &str, axis_name: &str, value: impl Into<String>) -> Self {
        self.push(sensor_name, axis_name, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.readings.values().flat_map(BTreeMap::values).all(Vec::is_empty)
    }

    fn values(&self, sensor_name: &str, axis_name: &str) -> &[String] {
        self.readings
            .get(sensor_name)
            .and_then(|axes| axes.get(axis_name))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Groups `batch` by the sensors and axes `thing` defines, in name order.
/// Readings for sensors or axes the thing does not define are left out, and
/// so are sensors without readings.
pub fn sensor_readings_payload(thing: &Thing, batch: &ReadingBatch) -> Vec<SensorReadingsPayload> {
    thing
        .sensors
        .values()
        .filter_map(|sensor| {
            let axis_readings: Vec<AxisReadingPayload> = sensor
                .axis_names()
                .flat_map(move |axis| {
                    batch
                        .values(&sensor.sensor_name, axis)
                        .iter()
                        .map(move |value| AxisReadingPayload {
                            axis_name: axis.to_string(),
                            data: value.clone(),
                        })
                })
                .collect();
            (!axis_readings.is_empty()).then(|| SensorReadingsPayload {
                sensor_name: sensor.sensor_name.clone(),
                axis_readings,
            })
        })
        .collect()
}

/// Result of a health check.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceStatus {
    pub service_up: bool,
    pub response_time: Duration,
    /// Health endpoint body, when the call succeeded
    pub response: Option<Value>,
}

/// Which remote results are mirrored locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PersistenceFlags {
    /// Store newly registered accounts and things
    pub persist_on_success: bool,
    /// Store passphrases in plain text
    pub persist_passphrase: bool,
    /// Store session and thing tokens
    pub persist_tokens: bool,
}

impl Default for PersistenceFlags {
    fn default() -> Self {
        Self {
            persist_on_success: true,
            persist_passphrase: false,
            persist_tokens: true,
        }
    }
}

#[derive(Debug)]
pub struct ActionOutcome<T> {
    pub value: T,
    pub error: Option<ActionFailure>,
}

impl<T> ActionOutcome<T> {
    fn ok(value: T) -> Self {
        Self { value, error: None }
    }

    fn failed(value: T, failure: ActionFailure) -> Self {
        warn!(error = %failure, "action did not complete");
        Self {
            value,
            error: Some(failure),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

pub struct AccountActions {
    remote: Box<dyn RemoteService>,
    store: Arc<dyn RelationalStore>,
    flags: PersistenceFlags,
}

impl AccountActions {
    pub fn new(
        remote: Box<dyn RemoteService>,
        store: Arc<dyn RelationalStore>,
        flags: PersistenceFlags,
    ) -> Self {
        Self {
            remote,
            store,
            flags,
        }
    }

    /// Registers a root account. The returned value is `None` when the
    /// remote service rejected the registration.
    #[instrument(skip(self, passphrase))]
    pub async fn register_account(
        &self,
        email: &str,
        display_name: &str,
        passphrase: &str,
    ) -> StoreResult<ActionOutcome<Option<Account>>> {
        let account_ref = match self
            .remote
            .register_account(email.to_string(), display_name.to_string(), passphrase.to_string())
            .await
        {
            Ok(account_ref) => account_ref,
            Err(e) => return Ok(ActionOutcome::failed(None, ActionFailure::Remote(e.to_string()))),
        };

        let account = Account::new(account_ref, email, display_name).with_passphrase(passphrase);
        info!(account_ref = %account.account_ref, "account registered");
        if !self.flags.persist_on_success {
            return Ok(ActionOutcome::ok(Some(account)));
        }

        let outcome = self
            .store
            .create_account(&account, self.flags.persist_passphrase)?;
        Ok(settle(Some(account), outcome))
    }

    /// Starts a session and stores its token on the account.
    #[instrument(skip_all, fields(account_ref = %account.account_ref))]
    pub async fn authenticate_account(
        &self,
        mut account: Account,
    ) -> StoreResult<ActionOutcome<Account>> {
        let Some(passphrase) = account.passphrase.clone() else {
            return Ok(ActionOutcome::failed(
                account,
                ActionFailure::MissingCredential("passphrase"),
            ));
        };

        let token = match self
            .remote
            .authenticate(account.account_ref.clone(), passphrase)
            .await
        {
            Ok(token) => token,
            Err(e) => return Ok(ActionOutcome::failed(account, ActionFailure::Remote(e.to_string()))),
        };

        let created_at = Utc::now().timestamp();
        account.session_token = Some(token.clone());
        account.session_created_at = Some(created_at);
        if !self.flags.persist_tokens {
            return Ok(ActionOutcome::ok(account));
        }

        let outcome = self
            .store
            .update_account_session(&account.account_ref, &token, created_at)?;
        Ok(settle(account, outcome))
    }

    /// Registers `thing` under the account and stores the aggregate with the
    /// id the remote service assigned.
    #[instrument(skip_all, fields(account_ref = %account.account_ref, name = %thing.name))]
    pub async fn register_thing(
        &self,
        account: &Account,
        mut thing: Thing,
    ) -> StoreResult<ActionOutcome<Thing>> {
        let Some(session_token) = account.session_token.clone() else {
            return Ok(ActionOutcome::failed(
                thing,
                ActionFailure::MissingCredential("session token"),
            ));
        };

        match self.remote.register_thing(session_token, thing.clone()).await {
            Ok(thing_id) => thing.thing_id = thing_id,
            Err(e) => return Ok(ActionOutcome::failed(thing, ActionFailure::Remote(e.to_string()))),
        }
        info!(thing_id = %thing.thing_id, "thing registered");
        if !self.flags.persist_on_success {
            return Ok(ActionOutcome::ok(thing));
        }

        let outcome = self.store.create_thing(&thing, &account.account_ref)?;
        Ok(settle(thing, outcome))
    }

    /// Fetches a new thing token and stores it when tokens are persisted.
    #[instrument(skip_all, fields(account_ref = %account.account_ref, thing_id = %thing.thing_id))]
    pub async fn refresh_thing_token(
        &self,
        account: &Account,
        mut thing: Thing,
    ) -> StoreResult<ActionOutcome<Thing>> {
        let Some(session_token) = account.session_token.clone() else {
            return Ok(ActionOutcome::failed(
                thing,
                ActionFailure::MissingCredential("session token"),
            ));
        };

        let token = match self
            .remote
            .thing_token(session_token, thing.thing_id.clone())
            .await
        {
            Ok(token) => token,
            Err(e) => return Ok(ActionOutcome::failed(thing, ActionFailure::Remote(e.to_string()))),
        };

        thing.token = Some(token.clone());
        if !self.flags.persist_tokens {
            return Ok(ActionOutcome::ok(thing));
        }

        let outcome = self.store.update_thing_token(&thing.thing_id, &token)?;
        Ok(settle(thing, outcome))
    }

    /// Replaces the account passphrase remotely, and locally when passphrases
    /// are persisted.
    #[instrument(skip_all, fields(account_ref = %account.account_ref))]
    pub async fn reset_passphrase(
        &self,
        mut account: Account,
        new_passphrase: &str,
    ) -> StoreResult<ActionOutcome<Account>> {
        if let Err(e) = self
            .remote
            .reset_passphrase(account.account_ref.clone(), new_passphrase.to_string())
            .await
        {
            return Ok(ActionOutcome::failed(account, ActionFailure::Remote(e.to_string())));
        }

        account.passphrase = Some(new_passphrase.to_string());
        if !self.flags.persist_passphrase {
            return Ok(ActionOutcome::ok(account));
        }

        let outcome = self
            .store
            .update_account_passphrase(&account.account_ref, new_passphrase)?;
        Ok(settle(account, outcome))
    }

    /// Activates an account. Nothing is stored locally.
    #[instrument(skip_all, fields(account_ref = %account.account_ref))]
    pub async fn activate_account(
        &self,
        account: Account,
        activation_token: &str,
    ) -> ActionOutcome<Account> {
        let Some(passphrase) = account.passphrase.clone() else {
            return ActionOutcome::failed(account, ActionFailure::MissingCredential("passphrase"));
        };

        match self
            .remote
            .activate_account(
                account.account_ref.clone(),
                activation_token.to_string(),
                passphrase,
            )
            .await
        {
            Ok(()) => {
                info!("account activated");
                ActionOutcome::ok(account)
            }
            Err(e) => ActionOutcome::failed(account, ActionFailure::Remote(e.to_string())),
        }
    }

    /// Uploads the readings in `batch` for `thing`. The value is the number of
    /// records the service captured. When nothing in the batch matches the
    /// thing's sensors the service is not called.
    #[instrument(skip_all, fields(account_ref = %account.account_ref, thing_id = %thing.thing_id))]
    pub async fn log_readings(
        &self,
        account: &Account,
        thing: &Thing,
        batch: &ReadingBatch,
        reading_timestamp: i64,
    ) -> ActionOutcome<u64> {
        let Some(session_token) = account.session_token.clone() else {
            return ActionOutcome::failed(0, ActionFailure::MissingCredential("session token"));
        };
        let Some(thing_token) = thing.token.clone() else {
            return ActionOutcome::failed(0, ActionFailure::MissingCredential("thing token"));
        };

        let sensors = sensor_readings_payload(thing, batch);
        if sensors.is_empty() {
            return ActionOutcome::failed(0, ActionFailure::NoReadings);
        }

        let payload = ReadingsPayload {
            reading_timestamp: reading_timestamp.to_string(),
            sensors,
        };
        match self.remote.log_readings(session_token, thing_token, payload).await {
            Ok(captured) => {
                info!(captured, "readings logged");
                ActionOutcome::ok(captured)
            }
            Err(e) => ActionOutcome::failed(0, ActionFailure::Remote(e.to_string())),
        }
    }

    /// Calls the health endpoint. The service is up when the body carries
    /// `"Ping": "ok"`, in any letter case.
    #[instrument(skip(self))]
    pub async fn check_service(&self) -> ServiceStatus {
        let started = Instant::now();
        let response = match self.remote.ping().await {
            Ok(body) => Some(body),
            Err(e) => {
                warn!(error = %e, "service check failed");
                None
            }
        };
        let service_up = response
            .as_ref()
            .and_then(|body| body.get("Ping"))
            .and_then(Value::as_str)
            .is_some_and(|ping| ping.eq_ignore_ascii_case("ok"));
        ServiceStatus {
            service_up,
            response_time: started.elapsed(),
            response,
        }
    }
}

/// Keeps the in-memory value and records a rejected write as the failure.
fn settle<T, W>(value: T, outcome: WriteOutcome<W>) -> ActionOutcome<T> {
    match outcome {
        WriteOutcome::Written(_) => ActionOutcome::ok(value),
        WriteOutcome::Failed { reason } => {
            ActionOutcome::failed(value, ActionFailure::NotPersisted(reason))
        }
    }
}
