use std::{collections::HashMap, io::ErrorKind, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use tokio::{
    net::TcpListener,
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{error, info, warn};

use hvac_common::{
    command_message, entity_from_state_topic, CallbackKind, CommandError, EngineAction,
    HvacMode, MemoryStates, RestoredState, TemperatureRequest, Thermostat, ThermostatConfig,
    TOPIC_CMD_ACTION_REASON, TOPIC_CMD_HUMIDITY, TOPIC_CMD_MODE, TOPIC_CMD_PRESET,
    TOPIC_CMD_TARGET, TOPIC_CONTROLLER_STATE, TOPIC_ENTITY_STATE_FILTER,
};

/// The thermostat together with the entity states it reads. One lock guards
/// both so a control pass never interleaves with another.
struct Engine {
    thermostat: Thermostat,
    states: MemoryStates,
}

#[derive(Clone)]
struct AppState {
    engine: Arc<Mutex<Engine>>,
    callbacks: Arc<Mutex<HashMap<CallbackKind, JoinHandle<()>>>>,
    /// Action batches in pass order, drained by the executor task.
    actions: mpsc::UnboundedSender<Vec<EngineAction>>,
    mqtt: AsyncClient,
    store: AppStore,
}

impl AppState {
    fn new(
        thermostat: Thermostat,
        mqtt: AsyncClient,
        store: AppStore,
    ) -> (Self, mpsc::UnboundedReceiver<Vec<EngineAction>>) {
        let (actions, queued) = mpsc::unbounded_channel();
        let state = Self {
            engine: Arc::new(Mutex::new(Engine {
                thermostat,
                states: MemoryStates::new(),
            })),
            callbacks: Arc::new(Mutex::new(HashMap::new())),
            actions,
            mqtt,
            store,
        };
        (state, queued)
    }

    /// Queues a pass's actions. Callers hold the engine lock, so batches
    /// reach the executor in the order their passes ran.
    fn dispatch(&self, actions: Vec<EngineAction>) {
        if actions.is_empty() {
            return;
        }
        if self.actions.send(actions).is_err() {
            warn!("action executor stopped, dropping engine actions");
        }
    }
}

#[derive(Clone)]
struct AppStore {
    state_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;
const STARTUP_SETTLE: Duration = Duration::from_secs(2);
const STATE_PUBLISH_INTERVAL: Duration = Duration::from_secs(10);

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = load_config().await?;
    let keep_alive = config.keep_alive();
    let mut thermostat = Thermostat::new(config).map_err(|err| {
        error!("invalid thermostat configuration: {err}");
        err
    })?;

    let store = AppStore::new();
    match store.load_state().await {
        Ok(Some(restored)) => thermostat.apply_old_state(&restored),
        Ok(None) => {}
        Err(err) => warn!("failed to load persisted state: {err:#}"),
    }

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or_else(|_| "localhost".to_string());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(1883);

    let mut mqtt_options = MqttOptions::new("hvac-controller", mqtt_host, mqtt_port);
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or_default();
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or_default();
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let (app_state, queued) = AppState::new(thermostat, mqtt, store);

    subscribe_topics(&app_state.mqtt).await?;
    spawn_action_executor(app_state.clone(), queued);
    spawn_mqtt_loop(app_state.clone(), eventloop);
    spawn_startup(app_state.clone(), keep_alive);
    spawn_state_publish_loop(app_state.clone());

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/mode", post(handle_set_mode))
        .route("/api/temperature", post(handle_set_temperature))
        .route("/api/humidity", post(handle_set_humidity))
        .route("/api/preset", post(handle_set_preset))
        .route("/api/action_reason", post(handle_set_action_reason))
        .with_state(app_state.clone());

    let port = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown(&app_state).await;
    Ok(())
}

async fn load_config() -> anyhow::Result<ThermostatConfig> {
    let path = std::env::var("HVAC_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./hvac.json"));
    let raw = tokio::fs::read(&path)
        .await
        .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("failed to parse config {}", path.display()))
}

async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    let topics = [
        TOPIC_ENTITY_STATE_FILTER,
        TOPIC_CMD_MODE,
        TOPIC_CMD_TARGET,
        TOPIC_CMD_HUMIDITY,
        TOPIC_CMD_PRESET,
        TOPIC_CMD_ACTION_REASON,
    ];

    for topic in topics {
        mqtt.subscribe(topic, QoS::AtMostOnce)
            .await
            .with_context(|| format!("failed to subscribe to {topic}"))?;
    }
    Ok(())
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&app_state, message.topic, message.payload.to_vec())
                            .await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

/// Gives retained entity states time to arrive, runs the first pass, then
/// drives the keep-alive tick.
fn spawn_startup(app_state: AppState, keep_alive: Option<Duration>) {
    tokio::spawn(async move {
        tokio::time::sleep(STARTUP_SETTLE).await;
        let _ = run_engine(&app_state, |thermostat, states, now| {
            Ok(thermostat.startup(states, now))
        })
        .await;

        let Some(period) = keep_alive else {
            return;
        };
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            let _ = run_engine(&app_state, |thermostat, states, now| {
                Ok(thermostat.keep_alive(states, now))
            })
            .await;
        }
    });
}

fn spawn_state_publish_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATE_PUBLISH_INTERVAL);
        loop {
            interval.tick().await;

            let payload = {
                let engine = app_state.engine.lock().await;
                serde_json::to_vec(&engine.thermostat.attributes(&engine.states, Utc::now()))
            };

            match payload {
                Ok(body) => {
                    if let Err(err) = app_state
                        .mqtt
                        .publish(TOPIC_CONTROLLER_STATE, QoS::AtLeastOnce, true, body)
                        .await
                    {
                        warn!("controller state publish failed: {err}");
                    }
                }
                Err(err) => warn!("controller state serialization failed: {err}"),
            }
        }
    });
}

/// Runs one engine entry point under the lock, records the commanded states
/// and queues the resulting actions before releasing it.
async fn run_engine<F>(app_state: &AppState, f: F) -> Result<(), CommandError>
where
    F: FnOnce(&mut Thermostat, &MemoryStates, DateTime<Utc>) -> Result<Vec<EngineAction>, CommandError>,
{
    let mut engine = app_state.engine.lock().await;
    let now = Utc::now();
    let Engine { thermostat, states } = &mut *engine;
    let actions = f(thermostat, states, now)?;
    states.apply(&actions, now);
    app_state.dispatch(actions);
    Ok(())
}

/// Single consumer of the action queue: publishes, schedules and cancels
/// strictly in pass order.
fn spawn_action_executor(
    app_state: AppState,
    mut queued: mpsc::UnboundedReceiver<Vec<EngineAction>>,
) {
    tokio::spawn(async move {
        while let Some(actions) = queued.recv().await {
            execute_engine_actions(&app_state, actions).await;
        }
    });
}

async fn execute_engine_actions(app_state: &AppState, actions: Vec<EngineAction>) {
    for action in actions {
        match action {
            EngineAction::ScheduleCallback { kind, delay } => {
                let handle = spawn_callback(app_state.clone(), kind.clone(), delay);
                if let Some(previous) = app_state.callbacks.lock().await.insert(kind, handle) {
                    previous.abort();
                }
            }
            EngineAction::CancelCallback(kind) => {
                if let Some(handle) = app_state.callbacks.lock().await.remove(&kind) {
                    handle.abort();
                }
            }
            command => {
                let Some((topic, payload)) = command_message(&command) else {
                    continue;
                };
                info!("device command: {topic} {payload}");
                if let Err(err) = app_state
                    .mqtt
                    .publish(topic, QoS::AtLeastOnce, false, payload)
                    .await
                {
                    warn!("device command publish failed: {err}");
                }
            }
        }
    }
}

fn spawn_callback(app_state: AppState, kind: CallbackKind, delay: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        app_state.callbacks.lock().await.remove(&kind);
        let _ = run_engine(&app_state, |thermostat, states, now| {
            Ok(thermostat.handle_callback(&kind, states, now))
        })
        .await;
    })
}

async fn handle_mqtt_message(
    app_state: &AppState,
    topic: String,
    payload: Vec<u8>,
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let message = String::from_utf8(payload).context("non utf8 mqtt payload")?;
    let message = message.trim();

    if let Some(entity) = entity_from_state_topic(&topic) {
        // Sensors re-evaluate on every report, other entities only on change.
        let mut engine = app_state.engine.lock().await;
        let now = Utc::now();
        let Engine { thermostat, states } = &mut *engine;
        let changed = states.set(&entity, message, now);
        if !changed && thermostat.config().sensor_kind(&entity).is_none() {
            return Ok(());
        }
        let actions = thermostat.entity_changed(&entity, states, now);
        states.apply(&actions, now);
        app_state.dispatch(actions);
        return Ok(());
    }

    let result = match topic.as_str() {
        TOPIC_CMD_MODE => match message.parse::<HvacMode>() {
            Ok(mode) => {
                run_engine(app_state, |thermostat, states, now| {
                    thermostat.set_hvac_mode(mode, states, now)
                })
                .await
            }
            Err(err) => Err(err),
        },
        TOPIC_CMD_TARGET => {
            let request = parse_temperature_payload(message)?;
            run_engine(app_state, |thermostat, states, now| {
                thermostat.set_temperature(request, states, now)
            })
            .await
        }
        TOPIC_CMD_HUMIDITY => {
            let humidity = message
                .parse::<f64>()
                .with_context(|| format!("invalid humidity '{message}'"))?;
            run_engine(app_state, |thermostat, states, now| {
                Ok(thermostat.set_humidity(humidity, states, now))
            })
            .await
        }
        TOPIC_CMD_PRESET => {
            run_engine(app_state, |thermostat, states, now| {
                thermostat.set_preset_mode(message, states, now)
            })
            .await
        }
        TOPIC_CMD_ACTION_REASON => {
            let mut engine = app_state.engine.lock().await;
            engine.thermostat.set_action_reason(message)
        }
        _ => return Ok(()),
    };

    result.with_context(|| format!("command on {topic} rejected"))?;
    persist_state(app_state).await
}

/// Accepts a bare number or a JSON setpoint request.
fn parse_temperature_payload(message: &str) -> anyhow::Result<TemperatureRequest> {
    if let Ok(temperature) = message.parse::<f64>() {
        return Ok(TemperatureRequest {
            temperature: Some(temperature),
            ..TemperatureRequest::default()
        });
    }
    serde_json::from_str(message).with_context(|| format!("invalid temperature payload '{message}'"))
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let engine = state.engine.lock().await;
    Json(engine.thermostat.attributes(&engine.states, Utc::now()))
}

async fn handle_set_mode(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let mode = match value.parse::<HvacMode>() {
        Ok(mode) => mode,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };
    let result = run_engine(&state, |thermostat, states, now| {
        thermostat.set_hvac_mode(mode, states, now)
    })
    .await;
    command_response(state, result).await
}

async fn handle_set_temperature(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let mut request = TemperatureRequest::default();
    for (key, slot) in [
        ("value", &mut request.temperature),
        ("low", &mut request.target_temp_low),
        ("high", &mut request.target_temp_high),
    ] {
        if let Some(raw) = params.get(key) {
            let Ok(value) = raw.parse::<f64>() else {
                return error_response(StatusCode::BAD_REQUEST, "Invalid temperature value");
            };
            *slot = Some(value);
        }
    }
    let result = run_engine(&state, |thermostat, states, now| {
        thermostat.set_temperature(request, states, now)
    })
    .await;
    command_response(state, result).await
}

async fn handle_set_humidity(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Ok(humidity) = value.parse::<f64>() else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid humidity value");
    };
    let result = run_engine(&state, |thermostat, states, now| {
        Ok(thermostat.set_humidity(humidity, states, now))
    })
    .await;
    command_response(state, result).await
}

async fn handle_set_preset(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let result = run_engine(&state, |thermostat, states, now| {
        thermostat.set_preset_mode(value, states, now)
    })
    .await;
    command_response(state, result).await
}

async fn handle_set_action_reason(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let result = state.engine.lock().await.thermostat.set_action_reason(value);
    command_response(state, result).await
}

async fn command_response(
    state: AppState,
    result: Result<(), CommandError>,
) -> axum::response::Response {
    if let Err(err) = result {
        return error_response(StatusCode::BAD_REQUEST, &err.to_string());
    }
    if let Err(err) = persist_state(&state).await {
        warn!("failed to persist thermostat state: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist thermostat state",
        );
    }
    handle_get_status(State(state)).await.into_response()
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
    }
}

async fn shutdown(app_state: &AppState) {
    info!("shutting down");
    {
        let mut engine = app_state.engine.lock().await;
        let actions = engine.thermostat.shutdown();
        execute_engine_actions(app_state, actions).await;
    }
    for (_, handle) in app_state.callbacks.lock().await.drain() {
        handle.abort();
    }
    if let Err(err) = persist_state(app_state).await {
        warn!("failed to persist thermostat state: {err:#}");
    }
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("HVAC_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.hvac"));

        Self {
            state_path: Arc::new(data_dir.join("state.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load_state(&self) -> anyhow::Result<Option<RestoredState>> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.state_path.as_ref()).await {
            Ok(raw) => Ok(Some(serde_json::from_slice::<RestoredState>(&raw)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_state(&self, state: &RestoredState) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.state_path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(state)?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }
}

async fn persist_state(state: &AppState) -> anyhow::Result<()> {
    let restored = state.engine.lock().await.thermostat.restored_state();
    state.store.save_state(&restored).await
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
