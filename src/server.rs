use crate::config::Config;
use crate::data::{ClassId, PeriodIndex, ReferenceData, RoomIndex, StepOutput, TimeTable};
use crate::error::{OptimizerError, ProtocolError, SessionError, ValidationError};
use crate::geometry::{Region, region_of_assignment};
use crate::optimizer::Backend;
use crate::protocol::{GenerationProtocol, ProtocolState, consult};
use crate::score;
use crate::session::Session;
use anyhow::Context;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// The session and the step state machine, always updated together.
#[derive(Debug, Default)]
struct Workspace {
    session: Session,
    protocol: GenerationProtocol,
}

pub struct AppState {
    workspace: Mutex<Workspace>,
    // held for the whole optimizer round trip; lock before `workspace` when both are needed
    optimizer: tokio::sync::Mutex<Option<Backend>>,
    config: Config,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            workspace: Mutex::new(Workspace::default()),
            optimizer: tokio::sync::Mutex::new(None),
            config,
        }
    }

    fn workspace(&self) -> Result<MutexGuard<'_, Workspace>, ApiError> {
        self.workspace
            .lock()
            .map_err(|_| ApiError::Internal("workspace lock poisoned".to_string()))
    }
}

#[derive(Debug)]
pub enum ApiError {
    Session(SessionError),
    Protocol(ProtocolError),
    BadRequest(String),
    Internal(String),
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        ApiError::Session(e)
    }
}

impl From<ProtocolError> for ApiError {
    fn from(e: ProtocolError) -> Self {
        ApiError::Protocol(e)
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::Session(SessionError::Validation(e))
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Session(SessionError::Validation(_)) => StatusCode::CONFLICT,
            ApiError::Session(SessionError::UnknownAssignmentId(_)) => StatusCode::NOT_FOUND,
            ApiError::Session(SessionError::NoReferenceData) => StatusCode::BAD_REQUEST,
            ApiError::Protocol(ProtocolError::Optimizer(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Protocol(ProtocolError::NotAwaiting) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Protocol(_) => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Session(e) => e.to_string(),
            ApiError::Protocol(e) => e.to_string(),
            ApiError::BadRequest(msg) | ApiError::Internal(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{}", self.message());
        } else {
            debug!("{} {}", status, self.message());
        }
        (status, Json(serde_json::json!({ "error": self.message() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRequest {
    pub id: ClassId,
    pub room: RoomIndex,
    pub period: PeriodIndex,
    /// Lock the class where it was dropped.
    #[serde(default)]
    pub pin: bool,
}

#[derive(Debug, Deserialize)]
pub struct LockRequest {
    pub id: ClassId,
}

#[derive(Debug, Serialize)]
pub struct PlacedRegion {
    pub id: ClassId,
    #[serde(flatten)]
    pub region: Region,
}

#[derive(Debug, Serialize)]
pub struct GenerationStatus {
    pub state: ProtocolState,
    #[serde(rename = "committedSteps")]
    pub committed_steps: u64,
}

async fn set_input_handler(
    State(state): State<SharedState>,
    Json(reference): Json<ReferenceData>,
) -> Result<Json<TimeTable>, ApiError> {
    let backend = Backend::build(state.config.optimizer, &reference, &state.config.colony)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let mut optimizer = state.optimizer.lock().await;
    let mut ws = state.workspace()?;
    ws.protocol.ensure_idle()?;
    ws.session = Session::with_reference(reference);
    *optimizer = Some(backend);
    info!("Reference data installed, {:?} optimizer ready", state.config.optimizer);
    Ok(Json(ws.session.current()))
}

async fn rooms_handler(State(state): State<SharedState>) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.workspace()?.session.room_names()))
}

async fn periods_handler(State(state): State<SharedState>) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.workspace()?.session.period_names()))
}

async fn get_timetable_handler(
    State(state): State<SharedState>,
) -> Result<Json<TimeTable>, ApiError> {
    Ok(Json(state.workspace()?.session.current()))
}

async fn put_timetable_handler(
    State(state): State<SharedState>,
    Json(candidate): Json<TimeTable>,
) -> Result<Json<TimeTable>, ApiError> {
    let mut ws = state.workspace()?;
    ws.protocol.ensure_idle()?;
    Ok(Json(ws.session.replace(candidate)?))
}

async fn regions_handler(
    State(state): State<SharedState>,
) -> Result<Json<Vec<PlacedRegion>>, ApiError> {
    let ws = state.workspace()?;
    let regions = ws
        .session
        .table()
        .class_list
        .iter()
        .map(|a| PlacedRegion {
            id: a.id,
            region: region_of_assignment(a),
        })
        .collect();
    Ok(Json(regions))
}

async fn edit_handler(
    State(state): State<SharedState>,
    Json(edit): Json<EditRequest>,
) -> Result<Json<TimeTable>, ApiError> {
    let mut ws = state.workspace()?;
    ws.protocol.ensure_idle()?;
    let table = if edit.pin {
        ws.session.pin_at(edit.id, edit.room, edit.period)?
    } else {
        ws.session.apply_edit(edit.id, edit.room, edit.period)?
    };
    Ok(Json(table))
}

async fn lock_handler(
    State(state): State<SharedState>,
    Json(req): Json<LockRequest>,
) -> Result<Json<TimeTable>, ApiError> {
    let mut ws = state.workspace()?;
    ws.protocol.ensure_idle()?;
    Ok(Json(ws.session.toggle_lock(req.id)))
}

async fn step_handler(State(state): State<SharedState>) -> Result<Json<StepOutput>, ApiError> {
    // a dropped client must not leave the protocol waiting forever
    tokio::spawn(run_step(state))
        .await
        .map_err(|e| ApiError::Internal(format!("generation task failed: {}", e)))?
        .map(Json)
}

/// An outstanding step. Dropped before `finish`, it returns the protocol to idle.
struct StepGuard<'a> {
    state: &'a AppState,
    armed: bool,
}

impl<'a> StepGuard<'a> {
    fn begin(state: &'a AppState) -> Result<(Self, TimeTable), ApiError> {
        let mut ws = state.workspace()?;
        let Workspace { session, protocol } = &mut *ws;
        session.reference()?;
        let base = protocol.begin(session)?;
        Ok((Self { state, armed: true }, base))
    }

    fn finish(mut self, response: Result<TimeTable, OptimizerError>) -> Result<StepOutput, ApiError> {
        self.armed = false;
        let mut ws = self
            .state
            .workspace
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Workspace { session, protocol } = &mut *ws;
        let time_table = protocol.complete(session, response)?;
        let evaluation = score::evaluate(&time_table, session.reference()?);
        Ok(StepOutput {
            time_table,
            evaluation,
        })
    }
}

impl Drop for StepGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state
                .workspace
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .protocol
                .abort();
        }
    }
}

async fn run_step(state: SharedState) -> Result<StepOutput, ApiError> {
    let (guard, base) = StepGuard::begin(&state)?;

    let response = {
        let mut optimizer = state.optimizer.lock().await;
        match optimizer.as_mut() {
            Some(o) => consult(o, &base, Some(state.config.step_timeout())).await,
            None => Err(OptimizerError::Unavailable("no optimizer configured".to_string())),
        }
    };

    guard.finish(response)
}

async fn generation_state_handler(
    State(state): State<SharedState>,
) -> Result<Json<GenerationStatus>, ApiError> {
    let ws = state.workspace()?;
    Ok(Json(GenerationStatus {
        state: ws.protocol.state(),
        committed_steps: ws.protocol.committed_steps(),
    }))
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/v1/input", post(set_input_handler))
        .route("/v1/rooms", get(rooms_handler))
        .route("/v1/periods", get(periods_handler))
        .route(
            "/v1/timetable",
            get(get_timetable_handler).put(put_timetable_handler),
        )
        .route("/v1/timetable/regions", get(regions_handler))
        .route("/v1/timetable/edit", post(edit_handler))
        .route("/v1/timetable/lock", post(lock_handler))
        .route("/v1/generation/step", post(step_handler))
        .route("/v1/generation/state", get(generation_state_handler))
        .with_state(state)
}

pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let addr = config.bind_addr.clone();
    let app = router(Arc::new(AppState::new(config)));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    info!("Server running at http://{}", listener.local_addr()?);

    axum::serve(listener, app).await.context("serving HTTP")?;
    Ok(())
}
