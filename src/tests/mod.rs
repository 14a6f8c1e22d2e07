use crate::actions::{AccountActions, PersistenceFlags, ReadingBatch, ReadingsPayload, RemoteService};
use crate::error::{ActionFailure, BoxError, QueryFailure};
use crate::query::{QueryRunner, QueryStatus, QueryWindow, SensorQuery, SeriesRequest, TelemetrySource};
use crate::render::RenderMode;
use async_trait::async_trait;
use mockall::*;
use serde_json::{json, Value};
use std::sync::Arc;
use telemirror_store::{
    Account, RelationalStore, Sensor, SensorAxis, SqliteStore, StoreConfig, StoreError, Thing,
};
use tempfile::{tempdir, TempDir};

mock! {
    pub Source {}
    #[async_trait]
    impl TelemetrySource for Source {
        async fn fetch_series(&self, request: SeriesRequest) -> Result<Value, BoxError>;
    }
}

mock! {
    pub Remote {}
    #[async_trait]
    impl RemoteService for Remote {
        async fn register_account(&self, email: String, display_name: String, passphrase: String) -> Result<String, BoxError>;
        async fn authenticate(&self, account_ref: String, passphrase: String) -> Result<String, BoxError>;
        async fn register_thing(&self, session_token: String, thing: Thing) -> Result<String, BoxError>;
        async fn thing_token(&self, session_token: String, thing_id: String) -> Result<String, BoxError>;
        async fn reset_passphrase(&self, account_ref: String, passphrase: String) -> Result<(), BoxError>;
        async fn activate_account(&self, account_ref: String, activation_token: String, passphrase: String) -> Result<(), BoxError>;
        async fn log_readings(&self, session_token: String, thing_token: String, payload: ReadingsPayload) -> Result<u64, BoxError>;
        async fn ping(&self) -> Result<Value, BoxError>;
    }
}

fn weather_station() -> Thing {
    Thing::new("thing-1", "Weather Station", "roof unit").with_sensor(
        Sensor::new("wind", "anemometer")
            .with_axis(SensorAxis::new("speed", "m/s", "decimal"))
            .with_axis(SensorAxis::new("direction", "deg", "integer")),
    )
}

fn signed_in() -> Account {
    let mut account = Account::new("acct-1", "ops@example.com", "Ops");
    account.session_token = Some("session".into());
    account
}

fn store() -> (TempDir, Arc<SqliteStore>) {
    let dir = tempdir().unwrap();
    let store = SqliteStore::new(&StoreConfig::new(dir.path(), "mirror.sqlite"));
    store.init().unwrap();
    (dir, Arc::new(store))
}

fn with_token(mut thing: Thing) -> Thing {
    thing.token = Some("thing-token".into());
    thing
}

#[tokio::test]
async fn test_query_pivots_source_body() {
    let mut source = MockSource::new();
    source
        .expect_fetch_series()
        .withf(|req: &SeriesRequest| {
            req.session_token == "session"
                && req.thing_token == "thing-token"
                && req.sensor_name == "wind"
                && req.axis_names == vec!["direction".to_string(), "speed".to_string()]
                && req.limit == 1440
                && req.time_source == "ORIGIN"
        })
        .times(1)
        .returning(|_| {
            Ok(json!({
                "speed": [[200, "2"], [100, "1"]],
                "direction": [[100, "5"]]
            }))
        });

    let runner = QueryRunner::new(Box::new(source));
    let query = SensorQuery::new("wind").with_trace_id("trace-7");
    let outcome = runner
        .query_thing_sensor(&signed_in(), &with_token(weather_station()), &query)
        .await
        .unwrap();

    assert_eq!(outcome.status, QueryStatus::Succeeded);
    assert_eq!(outcome.total_records_returned, 2);
    assert_eq!(outcome.trace_id.as_deref(), Some("trace-7"));
    let rendered = outcome.rendered.unwrap();
    assert_eq!(
        rendered.documents[0].text,
        "timestamp,\"direction\",\"speed\"\n100,5,1\n200,,2\n"
    );
}

#[tokio::test]
async fn test_query_default_window_is_current() {
    let mut source = MockSource::new();
    let now = chrono::Utc::now().timestamp();
    source
        .expect_fetch_series()
        .withf(move |req: &SeriesRequest| {
            req.window.start >= now - 86_400 && req.window.stop >= now - 300
        })
        .times(1)
        .returning(|_| Ok(json!({})));

    let runner = QueryRunner::new(Box::new(source));
    let outcome = runner
        .query_thing_sensor(&signed_in(), &with_token(weather_station()), &SensorQuery::new("wind"))
        .await
        .unwrap();
    assert_eq!(outcome.status, QueryStatus::Succeeded);
    assert_eq!(outcome.total_records_returned, 0);
}

#[tokio::test]
async fn test_query_filters_unknown_axes() {
    let mut source = MockSource::new();
    source
        .expect_fetch_series()
        .withf(|req: &SeriesRequest| req.axis_names == vec!["speed".to_string()])
        .times(1)
        .returning(|_| Ok(json!({"speed": [[1, "3.5"]]})));

    let runner = QueryRunner::new(Box::new(source));
    let query = SensorQuery::new("wind")
        .with_axes(["speed", "gust"])
        .with_window(QueryWindow::new(0, 10));
    let outcome = runner
        .query_thing_sensor(&signed_in(), &with_token(weather_station()), &query)
        .await
        .unwrap();
    assert_eq!(outcome.total_records_returned, 1);
}

#[tokio::test]
async fn test_query_without_tokens_skips_source() {
    let mut source = MockSource::new();
    source.expect_fetch_series().never();
    let runner = QueryRunner::new(Box::new(source));
    let query = SensorQuery::new("wind");

    let no_session = Account::new("acct-1", "ops@example.com", "Ops");
    let outcome = runner
        .query_thing_sensor(&no_session, &with_token(weather_station()), &query)
        .await
        .unwrap();
    assert!(outcome.is_error());
    assert!(matches!(outcome.error, Some(QueryFailure::MissingToken(_))));

    let outcome = runner
        .query_thing_sensor(&signed_in(), &weather_station(), &query)
        .await
        .unwrap();
    assert!(matches!(outcome.error, Some(QueryFailure::MissingToken(_))));

    let outcome = runner
        .query_thing_sensor(&signed_in(), &with_token(weather_station()), &SensorQuery::new("rain"))
        .await
        .unwrap();
    assert!(matches!(outcome.error, Some(QueryFailure::UnknownSensor(ref s)) if s == "rain"));
}

#[tokio::test]
async fn test_query_folds_source_and_pivot_failures() {
    let mut source = MockSource::new();
    let mut calls = 0;
    source.expect_fetch_series().times(2).returning(move |_| {
        calls += 1;
        if calls == 1 {
            Err("gateway timeout".into())
        } else {
            Ok(json!({"speed": [[1, "x", "extra"]]}))
        }
    });

    let runner = QueryRunner::new(Box::new(source));
    let thing = with_token(weather_station());
    let query = SensorQuery::new("wind");

    let outcome = runner.query_thing_sensor(&signed_in(), &thing, &query).await.unwrap();
    assert_eq!(outcome.status, QueryStatus::Failed);
    assert!(matches!(outcome.error, Some(QueryFailure::Source(ref m)) if m.contains("gateway")));
    assert!(outcome.rendered.is_none());

    let outcome = runner.query_thing_sensor(&signed_in(), &thing, &query).await.unwrap();
    assert!(matches!(outcome.error, Some(QueryFailure::Pivot(_))));
}

#[tokio::test]
async fn test_query_exports_per_axis_files() {
    let dir = tempdir().unwrap();
    let mut source = MockSource::new();
    source.expect_fetch_series().returning(|_| {
        Ok(json!({"speed": [[100, "1"], [200, "2"]], "direction": [[100, "5"]]}))
    });

    let runner = QueryRunner::new(Box::new(source));
    let query = SensorQuery::new("wind")
        .with_mode(RenderMode::PerAxis)
        .export_to(dir.path())
        .without_data_set();
    let outcome = runner
        .query_thing_sensor(&signed_in(), &with_token(weather_station()), &query)
        .await
        .unwrap();

    assert!(outcome.rendered.is_none());
    // First axis in column order is "direction".
    assert_eq!(outcome.total_records_returned, 1);
    assert_eq!(outcome.exported.len(), 2);
    let names: Vec<String> = outcome
        .exported
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert!(names[0].starts_with("Weather-Station_") && names[0].ends_with("_sensor_direction.csv"));
    assert!(names[1].ends_with("_sensor_speed.csv"));
    assert_eq!(
        std::fs::read_to_string(&outcome.exported[1]).unwrap(),
        "timestamp,\"speed\"\n100,1\n200,2\n"
    );
}

#[tokio::test]
async fn test_query_export_failure_is_raised() {
    let dir = tempdir().unwrap();
    let mut source = MockSource::new();
    source
        .expect_fetch_series()
        .returning(|_| Ok(json!({"speed": [[1, "1"]]})));

    let runner = QueryRunner::new(Box::new(source));
    let query = SensorQuery::new("wind").export_to(dir.path().join("missing"));
    let result = runner
        .query_thing_sensor(&signed_in(), &with_token(weather_station()), &query)
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_register_account_persists_without_passphrase() {
    let (_dir, store) = store();
    let mut remote = MockRemote::new();
    remote
        .expect_register_account()
        .times(1)
        .returning(|_, _, _| Ok("acct-9".into()));

    let actions = AccountActions::new(Box::new(remote), store.clone(), PersistenceFlags::default());
    let outcome = actions
        .register_account("ops@example.com", "Ops", "hunter2")
        .await
        .unwrap();

    assert!(!outcome.is_error());
    let account = outcome.value.unwrap();
    assert_eq!(account.passphrase.as_deref(), Some("hunter2"));

    let stored = store.read_account("acct-9").unwrap();
    assert_eq!(stored.email, "ops@example.com");
    assert_eq!(stored.passphrase, None);
}

#[tokio::test]
async fn test_register_account_remote_failure() {
    let (_dir, store) = store();
    let mut remote = MockRemote::new();
    remote
        .expect_register_account()
        .returning(|_, _, _| Err("email taken".into()));

    let actions = AccountActions::new(Box::new(remote), store.clone(), PersistenceFlags::default());
    let outcome = actions.register_account("ops@example.com", "Ops", "pw").await.unwrap();

    assert!(outcome.value.is_none());
    assert!(matches!(outcome.error, Some(ActionFailure::Remote(_))));
    assert!(store.get_account_ids().unwrap().is_empty());
}

#[tokio::test]
async fn test_authenticate_stores_session() {
    let (_dir, store) = store();
    let account = Account::new("acct-1", "ops@example.com", "Ops").with_passphrase("pw");
    assert!(store.create_account(&account, false).unwrap().is_written());

    let mut remote = MockRemote::new();
    remote
        .expect_authenticate()
        .withf(|account_ref, passphrase| account_ref == "acct-1" && passphrase == "pw")
        .returning(|_, _| Ok("fresh-session".into()));

    let actions = AccountActions::new(Box::new(remote), store.clone(), PersistenceFlags::default());
    let outcome = actions.authenticate_account(account).await.unwrap();

    assert!(!outcome.is_error());
    assert_eq!(outcome.value.session_token.as_deref(), Some("fresh-session"));
    let stored = store.read_account("acct-1").unwrap();
    assert_eq!(stored.session_token.as_deref(), Some("fresh-session"));
    assert_eq!(stored.session_created_at, outcome.value.session_created_at);
}

#[tokio::test]
async fn test_authenticate_unknown_account_reports_persistence_failure() {
    let (_dir, store) = store();
    let mut remote = MockRemote::new();
    remote.expect_authenticate().returning(|_, _| Ok("session".into()));

    let actions = AccountActions::new(Box::new(remote), store, PersistenceFlags::default());
    let account = Account::new("never-stored", "a@example.com", "A").with_passphrase("pw");
    let outcome = actions.authenticate_account(account).await.unwrap();

    assert_eq!(outcome.value.session_token.as_deref(), Some("session"));
    assert!(matches!(outcome.error, Some(ActionFailure::NotPersisted(_))));
}

#[tokio::test]
async fn test_register_thing_requires_session() {
    let (_dir, store) = store();
    let mut remote = MockRemote::new();
    remote.expect_register_thing().never();

    let actions = AccountActions::new(Box::new(remote), store, PersistenceFlags::default());
    let account = Account::new("acct-1", "ops@example.com", "Ops");
    let outcome = actions.register_thing(&account, weather_station()).await.unwrap();
    assert!(matches!(
        outcome.error,
        Some(ActionFailure::MissingCredential("session token"))
    ));
}

#[tokio::test]
async fn test_register_then_refresh_thing() {
    let (_dir, store) = store();
    let mut remote = MockRemote::new();
    remote
        .expect_register_thing()
        .withf(|token, thing| token == "session" && thing.name == "Weather Station")
        .returning(|_, _| Ok("remote-42".into()));
    remote
        .expect_thing_token()
        .withf(|_, thing_id| thing_id == "remote-42")
        .returning(|_, _| Ok("thing-token".into()));

    let actions = AccountActions::new(Box::new(remote), store.clone(), PersistenceFlags::default());
    let account = signed_in();

    let registered = actions.register_thing(&account, weather_station()).await.unwrap();
    assert!(!registered.is_error());
    assert_eq!(registered.value.thing_id, "remote-42");

    let refreshed = actions
        .refresh_thing_token(&account, registered.value)
        .await
        .unwrap();
    assert!(!refreshed.is_error());
    assert_eq!(refreshed.value.token.as_deref(), Some("thing-token"));

    let stored = store.read_things_for_account("acct-1").unwrap();
    let thing = &stored["remote-42"];
    assert_eq!(thing.token.as_deref(), Some("thing-token"));
    assert_eq!(thing.sensors["wind"].axes.len(), 2);
}

#[tokio::test]
async fn test_register_duplicate_thing_is_not_persisted() {
    let (_dir, store) = store();
    let mut remote = MockRemote::new();
    remote
        .expect_register_thing()
        .times(2)
        .returning(|_, _| Ok("same-id".into()));

    let actions = AccountActions::new(Box::new(remote), store, PersistenceFlags::default());
    let account = signed_in();
    assert!(!actions
        .register_thing(&account, weather_station())
        .await
        .unwrap()
        .is_error());

    let second = actions.register_thing(&account, weather_station()).await.unwrap();
    assert_eq!(second.value.thing_id, "same-id");
    assert!(matches!(second.error, Some(ActionFailure::NotPersisted(_))));
}

#[tokio::test]
async fn test_reset_passphrase_respects_flag() {
    let (_dir, store) = store();
    let account = Account::new("acct-1", "ops@example.com", "Ops");
    assert!(store.create_account(&account, false).unwrap().is_written());

    let mut remote = MockRemote::new();
    remote.expect_reset_passphrase().times(1).returning(|_, _| Ok(()));
    let flags = PersistenceFlags {
        persist_passphrase: true,
        ..PersistenceFlags::default()
    };
    let actions = AccountActions::new(Box::new(remote), store.clone(), flags);

    let outcome = actions.reset_passphrase(account.clone(), "new-pw").await.unwrap();
    assert_eq!(outcome.value.passphrase.as_deref(), Some("new-pw"));
    assert_eq!(
        store.read_account("acct-1").unwrap().passphrase.as_deref(),
        Some("new-pw")
    );

    let mut other = MockRemote::new();
    other.expect_reset_passphrase().returning(|_, _| Ok(()));
    let actions = AccountActions::new(Box::new(other), store.clone(), PersistenceFlags::default());
    let outcome = actions.reset_passphrase(account, "newer-pw").await.unwrap();
    assert_eq!(outcome.value.passphrase.as_deref(), Some("newer-pw"));
    assert_eq!(
        store.read_account("acct-1").unwrap().passphrase.as_deref(),
        Some("new-pw")
    );
}

#[tokio::test]
async fn test_unreachable_store_is_raised() {
    let dir = tempdir().unwrap();
    let store = Arc::new(SqliteStore::new(&StoreConfig::new(
        dir.path().join("does-not-exist"),
        "mirror.sqlite",
    )));
    let mut remote = MockRemote::new();
    remote
        .expect_register_account()
        .returning(|_, _, _| Ok("acct-1".into()));

    let actions = AccountActions::new(Box::new(remote), store, PersistenceFlags::default());
    let result = actions.register_account("ops@example.com", "Ops", "pw").await;
    assert!(matches!(result, Err(StoreError::Unavailable { .. })));
}

#[tokio::test]
async fn test_actions_return_in_memory_values_after_write() {
    let (_dir, store) = store();
    let account = Account::new("acct-1", "ops@example.com", "Ops").with_passphrase("pw");
    assert!(store.create_account(&account, false).unwrap().is_written());

    let mut remote = MockRemote::new();
    remote.expect_authenticate().returning(|_, _| Ok("session".into()));
    remote
        .expect_register_thing()
        .returning(|_, _| Ok("thing-1".into()));
    remote
        .expect_thing_token()
        .returning(|_, _| Ok("thing-token".into()));

    let actions = AccountActions::new(Box::new(remote), store.clone(), PersistenceFlags::default());
    let authenticated = actions.authenticate_account(account).await.unwrap();
    assert!(!authenticated.is_error());
    assert_eq!(authenticated.value.passphrase.as_deref(), Some("pw"));
    assert_eq!(store.read_account("acct-1").unwrap().passphrase, None);

    let registered = actions
        .register_thing(&authenticated.value, weather_station())
        .await
        .unwrap();
    let edited = registered.value.with_metadata(json!({"site": "roof"}));
    let refreshed = actions
        .refresh_thing_token(&authenticated.value, edited)
        .await
        .unwrap();
    assert!(!refreshed.is_error());
    assert_eq!(refreshed.value.metadata, json!({"site": "roof"}));
    assert_eq!(refreshed.value.token.as_deref(), Some("thing-token"));

    let stored = store.read_thing("thing-1").unwrap();
    assert_eq!(stored.token.as_deref(), Some("thing-token"));
    assert_ne!(stored.metadata, refreshed.value.metadata);
}

#[tokio::test]
async fn test_activate_account_sends_passphrase() {
    let (_dir, store) = store();
    let mut remote = MockRemote::new();
    remote
        .expect_activate_account()
        .withf(|account_ref, token, passphrase| {
            account_ref == "acct-1" && token == "act-123" && passphrase == "pw"
        })
        .times(1)
        .returning(|_, _, _| Ok(()));

    let actions = AccountActions::new(Box::new(remote), store.clone(), PersistenceFlags::default());
    let account = Account::new("acct-1", "ops@example.com", "Ops").with_passphrase("pw");
    let outcome = actions.activate_account(account, "act-123").await;

    assert!(!outcome.is_error());
    assert_eq!(outcome.value.account_ref, "acct-1");
    assert!(store.get_account_ids().unwrap().is_empty());
}

#[tokio::test]
async fn test_activate_account_without_passphrase_skips_remote() {
    let (_dir, store) = store();
    let mut remote = MockRemote::new();
    remote.expect_activate_account().never();

    let actions = AccountActions::new(Box::new(remote), store, PersistenceFlags::default());
    let account = Account::new("acct-1", "ops@example.com", "Ops");
    let outcome = actions.activate_account(account, "act-123").await;
    assert!(matches!(
        outcome.error,
        Some(ActionFailure::MissingCredential("passphrase"))
    ));
}

#[tokio::test]
async fn test_activate_account_remote_failure() {
    let (_dir, store) = store();
    let mut remote = MockRemote::new();
    remote
        .expect_activate_account()
        .returning(|_, _, _| Err("token expired".into()));

    let actions = AccountActions::new(Box::new(remote), store, PersistenceFlags::default());
    let account = Account::new("acct-1", "ops@example.com", "Ops").with_passphrase("pw");
    let outcome = actions.activate_account(account, "act-123").await;
    assert!(matches!(outcome.error, Some(ActionFailure::Remote(ref msg)) if msg == "token expired"));
}

#[tokio::test]
async fn test_log_readings_sends_grouped_payload() {
    let (_dir, store) = store();
    let mut remote = MockRemote::new();
    remote
        .expect_log_readings()
        .withf(|session, thing_token, payload: &ReadingsPayload| {
            let [sensor] = payload.sensors.as_slice() else {
                return false;
            };
            session == "session"
                && thing_token == "thing-token"
                && payload.reading_timestamp == "1700000000"
                && sensor.sensor_name == "wind"
                && sensor
                    .axis_readings
                    .iter()
                    .map(|r| (r.axis_name.as_str(), r.data.as_str()))
                    .eq([("direction", "270"), ("speed", "3.5"), ("speed", "4.0")])
        })
        .times(1)
        .returning(|_, _, _| Ok(3));

    let actions = AccountActions::new(Box::new(remote), store, PersistenceFlags::default());
    let batch = ReadingBatch::new()
        .with_reading("wind", "speed", "3.5")
        .with_reading("wind", "speed", "4.0")
        .with_reading("wind", "direction", "270")
        .with_reading("rain", "mm", "1");

    let outcome = actions
        .log_readings(&signed_in(), &with_token(weather_station()), &batch, 1_700_000_000)
        .await;
    assert!(!outcome.is_error());
    assert_eq!(outcome.value, 3);
}

#[tokio::test]
async fn test_log_readings_empty_batch_skips_remote() {
    let (_dir, store) = store();
    let mut remote = MockRemote::new();
    remote.expect_log_readings().never();

    let actions = AccountActions::new(Box::new(remote), store, PersistenceFlags::default());
    let thing = with_token(weather_station());

    let outcome = actions
        .log_readings(&signed_in(), &thing, &ReadingBatch::new(), 1_700_000_000)
        .await;
    assert!(matches!(outcome.error, Some(ActionFailure::NoReadings)));
    assert_eq!(outcome.value, 0);

    let unmatched = ReadingBatch::new().with_reading("rain", "mm", "1");
    let outcome = actions
        .log_readings(&signed_in(), &thing, &unmatched, 1_700_000_000)
        .await;
    assert!(matches!(outcome.error, Some(ActionFailure::NoReadings)));
}

#[tokio::test]
async fn test_log_readings_requires_tokens() {
    let (_dir, store) = store();
    let mut remote = MockRemote::new();
    remote.expect_log_readings().never();

    let actions = AccountActions::new(Box::new(remote), store, PersistenceFlags::default());
    let batch = ReadingBatch::new().with_reading("wind", "speed", "3.5");

    let outcome = actions
        .log_readings(&signed_in(), &weather_station(), &batch, 1_700_000_000)
        .await;
    assert!(matches!(
        outcome.error,
        Some(ActionFailure::MissingCredential("thing token"))
    ));

    let signed_out = Account::new("acct-1", "ops@example.com", "Ops");
    let outcome = actions
        .log_readings(&signed_out, &with_token(weather_station()), &batch, 1_700_000_000)
        .await;
    assert!(matches!(
        outcome.error,
        Some(ActionFailure::MissingCredential("session token"))
    ));
}

#[tokio::test]
async fn test_log_readings_remote_failure() {
    let (_dir, store) = store();
    let mut remote = MockRemote::new();
    remote
        .expect_log_readings()
        .returning(|_, _, _| Err("quota exceeded".into()));

    let actions = AccountActions::new(Box::new(remote), store, PersistenceFlags::default());
    let batch = ReadingBatch::new().with_reading("wind", "speed", "3.5");
    let outcome = actions
        .log_readings(&signed_in(), &with_token(weather_station()), &batch, 1_700_000_000)
        .await;
    assert!(matches!(outcome.error, Some(ActionFailure::Remote(_))));
    assert_eq!(outcome.value, 0);
}

#[tokio::test]
async fn test_check_service_reports_up() {
    let (_dir, store) = store();
    let mut remote = MockRemote::new();
    remote
        .expect_ping()
        .times(1)
        .returning(|| Ok(json!({"Ping": "OK"})));

    let actions = AccountActions::new(Box::new(remote), store, PersistenceFlags::default());
    let status = actions.check_service().await;
    assert!(status.service_up);
    assert_eq!(status.response, Some(json!({"Ping": "OK"})));
}

#[tokio::test]
async fn test_check_service_reports_down() {
    let (_dir, store) = store();
    let mut remote = MockRemote::new();
    let mut seq = Sequence::new();
    remote
        .expect_ping()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|| Err("connection refused".into()));
    remote
        .expect_ping()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|| Ok(json!({"Ping": "degraded"})));

    let actions = AccountActions::new(Box::new(remote), store, PersistenceFlags::default());
    let status = actions.check_service().await;
    assert!(!status.service_up);
    assert_eq!(status.response, None);

    let status = actions.check_service().await;
    assert!(!status.service_up);
    assert_eq!(status.response, Some(json!({"Ping": "degraded"})));
}
