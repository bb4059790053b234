mod error;

use std::{net::SocketAddr, time::Duration};

use actman::Handle;
use axum::{
    Json, Router,
    extract::{Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use tokio::{sync::oneshot, task::JoinHandle};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer};
use tracing::{error, info, warn};

pub use crate::actors::rest::error::{ApiError, Error};
use crate::{
    actors::reconcile::{
        self, DEFAULT_POPULATE_COUNT,
        merge::PartialUpdate,
        message::{
            MawbsByFlightMessage, Message, PopulateMessage, ReconcileMessage, SuggestField,
            SuggestMessage,
        },
    },
    command::Status,
    feeds,
    record::{Mawb, timestamp},
};

pub struct Actor {
    server_join_handle: JoinHandle<()>,
    shutdown_sender: oneshot::Sender<()>,
}

#[async_trait::async_trait]
impl actman::Actor for Actor {
    type Message = ();

    async fn run(mut self, mut state: actman::State<Self>) {
        loop {
            tokio::select! {
                Some(()) = state.message_receiver.recv() => {}
                Some(ctrl) = state.control_receiver.recv() => {
                    match ctrl {
                        actman::Control::Shutdown => {
                            info!("REST actor received shutdown control.");
                            break;
                        },
                    }
                }
                else => {
                    warn!("All channels closed, terminating REST actor.");
                    break;
                }
            }
        }

        self.shutdown().await;
    }
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub(crate) struct ServerState {
    pub(crate) reconcile_handle: Handle<reconcile::Actor>,
}

impl Actor {
    pub async fn new(
        config: &Config,
        reconcile_handle: Handle<reconcile::Actor>,
    ) -> Result<Self, Error> {
        let router = router(ServerState { reconcile_handle });
        let listener = tokio::net::TcpListener::bind(config.addr)
            .await
            .map_err(|cause| Error::IO {
                message: format!("Failed to listen on {}", config.addr),
                cause,
            })?;
        let local_addr = listener.local_addr().map_err(|cause| Error::IO {
            message: "Failed to read the bound address".to_string(),
            cause,
        })?;
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();
        let server_join_handle = tokio::spawn(async move {
            info!("starting REST server: {local_addr:?}");
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown_signal(shutdown_receiver).await })
                .await
            {
                error!("REST server terminated with an error: {e}");
            }
        });

        Ok(Self {
            server_join_handle,
            shutdown_sender,
        })
    }

    async fn shutdown(self) {
        // Send shutdown signal to the axum server
        if self.shutdown_sender.send(()).is_err() {
            warn!("REST server already stopped");
        }
        // Wait until the axum server task is terminated
        if let Err(e) = self.server_join_handle.await {
            error!("REST server task terminated abnormally: {e}");
        }
        info!("REST server has been shut down.");
    }
}

/// A future to be passed to the [`axum::serve::Serve::with_graceful_shutdown`].
/// When this future resolves, the axum server will start graceful shutdown.
async fn shutdown_signal(shutdown_receiver: oneshot::Receiver<()>) {
    let _ = shutdown_receiver.await;
    info!("starting graceful shutdown for REST server...");
}

pub(crate) fn router(state: ServerState) -> Router {
    Router::new()
        .route("/redwatch/", get(redwatch))
        .route("/smartkargo/", get(smartkargo))
        .route("/merge/", post(merge_feeds))
        .route("/update/", post(update_received))
        .route("/update-bt/", post(update_bt))
        .route("/mawb-suggestions/", get(mawb_suggestions))
        .route("/flight-suggestions/", get(flight_suggestions))
        .route("/mawb-by-flight/", get(mawbs_by_flight))
        .route("/populate/", post(populate))
        .route("/trolley-login/", post(trolley_login).options(preflight))
        .route("/status", get(status))
        .layer(
            // Necessary for graceful shutdown
            TimeoutLayer::new(REQUEST_TIMEOUT),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn request<T>(
    state: &ServerState,
    (message, reply_receiver): (Message, oneshot::Receiver<Result<T, reconcile::Error>>),
) -> Result<T, ApiError> {
    state.reconcile_handle.send(message).await;
    let Ok(result) = reply_receiver.await else {
        error!("failed to receive a reply from the reconcile actor");
        return Err(ApiError::Internal("reconciler is unavailable".to_string()));
    };
    Ok(result?)
}

async fn redwatch() -> impl IntoResponse {
    Json(feeds::redwatch(&mut rand::thread_rng(), timestamp::now()))
}

async fn smartkargo() -> impl IntoResponse {
    Json(feeds::smartkargo(&mut rand::thread_rng(), timestamp::now()))
}

async fn merge_feeds(State(state): State<ServerState>) -> Result<impl IntoResponse, ApiError> {
    let (reply_sender, reply_receiver) = oneshot::channel();
    let reconciled = request(&state, (Message::MergeFeeds { reply_sender }, reply_receiver)).await?;
    Ok(Json(reconciled.record))
}

#[derive(Debug, Deserialize)]
struct UpdateReceivedRequest {
    #[serde(default)]
    mawb: Option<String>,
    #[serde(default, deserialize_with = "lenient_count")]
    pcs_received: Option<i64>,
    #[serde(default)]
    checker_id: Option<String>,
    #[serde(default)]
    team_name: Option<String>,
}

async fn update_received(
    State(state): State<ServerState>,
    body: Result<Json<UpdateReceivedRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let (Some(mawb), Some(pcs_received)) = (non_empty(body.mawb), body.pcs_received) else {
        return Err(ApiError::BadRequest(
            "Missing mawb or pcs_received".to_string(),
        ));
    };

    let reconciled = request(
        &state,
        ReconcileMessage {
            mawb: mawb.into(),
            update: PartialUpdate {
                pcs_received: Some(pcs_received),
                checker_id: body.checker_id,
                team_name: body.team_name,
                ..Default::default()
            },
        }
        .into(),
    )
    .await?;
    Ok(Json(json!({
        "status": "success",
        "data": reconciled.record,
        "sheet": reconciled.sheet,
    })))
}

#[derive(Debug, Deserialize)]
struct UpdateBtRequest {
    #[serde(default)]
    mawb: Option<String>,
    #[serde(default)]
    bt_number: Option<String>,
    #[serde(default)]
    employee_id: Option<String>,
}

async fn update_bt(
    State(state): State<ServerState>,
    body: Result<Json<UpdateBtRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let (Some(mawb), Some(bt_number)) = (non_empty(body.mawb), non_empty(body.bt_number)) else {
        return Err(ApiError::BadRequest("Missing mawb or bt_number".to_string()));
    };

    let handover = timestamp::now();
    let reconciled = request(
        &state,
        ReconcileMessage {
            mawb: mawb.as_str().into(),
            update: PartialUpdate::towing(bt_number, handover, non_empty(body.employee_id)),
        }
        .into(),
    )
    .await?;
    Ok(Json(json!({
        "status": "success",
        "message": format!("Updated BT number for MAWB {mawb}"),
        "timestamp": timestamp::format(&handover),
        "sheet": reconciled.sheet,
    })))
}

#[derive(Debug, Deserialize)]
struct SuggestQuery {
    #[serde(default)]
    query: String,
}

async fn mawb_suggestions(
    State(state): State<ServerState>,
    Query(SuggestQuery { query }): Query<SuggestQuery>,
) -> impl IntoResponse {
    suggestions(&state, SuggestField::Mawb, query).await
}

async fn flight_suggestions(
    State(state): State<ServerState>,
    Query(SuggestQuery { query }): Query<SuggestQuery>,
) -> impl IntoResponse {
    suggestions(&state, SuggestField::FlightNumber, query).await
}

async fn suggestions(
    state: &ServerState,
    field: SuggestField,
    query: String,
) -> (StatusCode, Json<Vec<String>>) {
    if query.trim().is_empty() {
        return (StatusCode::OK, Json(vec![]));
    }
    match request(state, SuggestMessage { field, query }.into()).await {
        Ok(suggestions) => (StatusCode::OK, Json(suggestions)),
        Err(e) => {
            error!("failed to look up {field:?} suggestions: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(vec![]))
        }
    }
}

#[derive(Debug, Deserialize)]
struct FlightQuery {
    #[serde(default)]
    flight: String,
}

async fn mawbs_by_flight(
    State(state): State<ServerState>,
    Query(FlightQuery { flight }): Query<FlightQuery>,
) -> (StatusCode, Json<Vec<Mawb>>) {
    if flight.trim().is_empty() {
        return (StatusCode::OK, Json(vec![]));
    }
    match request(&state, MawbsByFlightMessage { flight }.into()).await {
        Ok(mawbs) => (StatusCode::OK, Json(mawbs)),
        Err(e) => {
            error!("failed to look up mawbs by flight: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(vec![]))
        }
    }
}

#[derive(Debug, Deserialize)]
struct PopulateQuery {
    count: Option<usize>,
}

async fn populate(
    State(state): State<ServerState>,
    Query(PopulateQuery { count }): Query<PopulateQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let count = count.unwrap_or(DEFAULT_POPULATE_COUNT);
    request(&state, PopulateMessage { count }.into()).await?;
    Ok(Json(json!({
        "status": "success",
        "message": "Sheet populated with dummy data",
    })))
}

#[derive(Debug, Deserialize)]
struct TrolleyLoginRequest {
    #[serde(default)]
    employee_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TrolleyUser {
    employee_id: String,
    role: &'static str,
}

/// Any non-empty employee id is accepted.
async fn trolley_login(
    body: Result<Json<TrolleyLoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let Some(employee_id) = non_empty(body.employee_id) else {
        return Err(ApiError::BadRequest("Employee ID is required".to_string()));
    };
    info!("trolley staff {employee_id} logged in");
    let user = TrolleyUser {
        employee_id,
        role: "trolley",
    };
    Ok(Json(json!({ "success": true, "user": user })))
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn status(State(state): State<ServerState>) -> Result<Json<Status>, ApiError> {
    let (reply_sender, reply_receiver) = oneshot::channel();
    Ok(Json(
        request(&state, (Message::Status { reply_sender }, reply_receiver)).await?,
    ))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Accepts a count sent either as a JSON number or as a numeric string.
fn lenient_count<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Count {
        Number(i64),
        Text(String),
    }

    match Option::<Count>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Count::Number(count)) => Ok(Some(count)),
        Some(Count::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(Count::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid piece count: {text:?}"))),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub addr: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        }
    }
}
