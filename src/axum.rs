//! Axum integration: a REST router over [`Engine`].
//!
//! Engine calls that take the state lock and write collection files run on
//! the blocking pool, so disk latency never stalls the async workers.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use crate::controller::DoorController;
use crate::engine::{Engine, RecognitionEvent};
use crate::error::Error;
use crate::model::{DoorPatch, GroupPatch, NewDoor, NewGroup, NewUser, UserPatch};
use crate::recorder::LogQuery;
use crate::store::Store;
use crate::types::{DoorId, GroupId, UserId};

use ::axum::Router;
use ::axum::extract::{Json, Path, Query, State};
use ::axum::http::StatusCode;
use ::axum::response::{IntoResponse, Response};
use ::axum::routing::{get, post, put};

type Shared<S, C> = State<Arc<Engine<S, C>>>;
type ApiResult<T> = std::result::Result<T, ApiError>;

/// Error returned by the REST handlers.
#[derive(Debug)]
pub enum ApiError {
    /// Engine error, mapped to a status by kind.
    Engine(Error),
    /// The identity directory refused a new user id.
    Unverified(String),
    /// A blocking engine task panicked or was cancelled.
    Task(String),
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self::Engine(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Engine(error) => {
                let status = match &error {
                    Error::NotFound { .. } => StatusCode::NOT_FOUND,
                    Error::InvalidReference { .. }
                    | Error::AlreadyExists { .. }
                    | Error::InvalidId(_)
                    | Error::InvalidValue(_) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, error.to_string())
            }
            Self::Unverified(message) => (StatusCode::BAD_REQUEST, message),
            Self::Task(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Runs a locking engine call on the blocking pool.
async fn blocking<S, C, T, F>(engine: Arc<Engine<S, C>>, op: F) -> ApiResult<T>
where
    S: Store + 'static,
    C: DoorController + 'static,
    T: Send + 'static,
    F: FnOnce(&Engine<S, C>) -> crate::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || op(&engine))
        .await
        .map_err(|err| ApiError::Task(err.to_string()))?
        .map_err(ApiError::from)
}

/// Builds the REST router. Every engine operation is exposed as one route.
pub fn router<S, C>(engine: Arc<Engine<S, C>>) -> Router
where
    S: Store + 'static,
    C: DoorController + 'static,
{
    Router::new()
        .route("/groups", get(list_groups::<S, C>).post(create_group::<S, C>))
        .route(
            "/groups/{id}",
            get(get_group::<S, C>)
                .put(update_group::<S, C>)
                .delete(delete_group::<S, C>),
        )
        .route("/groups/{id}/doors", get(group_doors::<S, C>))
        .route("/groups/{id}/users", get(group_users::<S, C>))
        .route("/doors", get(list_doors::<S, C>).post(create_door::<S, C>))
        .route(
            "/doors/{id}",
            get(get_door::<S, C>)
                .put(update_door::<S, C>)
                .delete(delete_door::<S, C>),
        )
        .route("/doors/{id}/open", post(open_door::<S, C>))
        .route("/users", get(list_users::<S, C>).post(create_user::<S, C>))
        .route(
            "/users/{id}",
            get(get_user::<S, C>)
                .put(update_user::<S, C>)
                .delete(delete_user::<S, C>),
        )
        .route(
            "/users/{id}/doors",
            get(accessible_doors::<S, C>).put(authorize_doors::<S, C>),
        )
        .route("/users/{id}/groups", put(authorize_groups::<S, C>))
        .route("/users/{id}/face", put(set_face::<S, C>))
        .route("/users/{id}/verify", get(verify_user::<S, C>))
        .route("/access/check", post(check_access::<S, C>))
        .route("/access/recognition", post(recognition::<S, C>))
        .route("/access-logs", get(access_logs::<S, C>))
        .route("/stats", get(stats::<S, C>))
        .with_state(engine)
}

async fn list_groups<S, C>(State(engine): Shared<S, C>) -> ApiResult<Response>
where
    S: Store + 'static,
    C: DoorController + 'static,
{
    let groups = blocking(engine, |engine| Ok(engine.groups())).await?;
    Ok(Json(groups).into_response())
}

async fn create_group<S, C>(
    State(engine): Shared<S, C>,
    Json(input): Json<NewGroup>,
) -> ApiResult<Response>
where
    S: Store + 'static,
    C: DoorController + 'static,
{
    let group = blocking(engine, move |engine| Ok(engine.create_group(input))).await?;
    Ok((StatusCode::CREATED, Json(group)).into_response())
}

async fn get_group<S, C>(
    State(engine): Shared<S, C>,
    Path(id): Path<GroupId>,
) -> ApiResult<Response>
where
    S: Store + 'static,
    C: DoorController + 'static,
{
    let group = blocking(engine, move |engine| engine.group(&id)).await?;
    Ok(Json(group).into_response())
}

async fn update_group<S, C>(
    State(engine): Shared<S, C>,
    Path(id): Path<GroupId>,
    Json(patch): Json<GroupPatch>,
) -> ApiResult<Response>
where
    S: Store + 'static,
    C: DoorController + 'static,
{
    let group = blocking(engine, move |engine| engine.update_group(&id, patch)).await?;
    Ok(Json(group).into_response())
}

async fn delete_group<S, C>(
    State(engine): Shared<S, C>,
    Path(id): Path<GroupId>,
) -> ApiResult<StatusCode>
where
    S: Store + 'static,
    C: DoorController + 'static,
{
    blocking(engine, move |engine| engine.delete_group(&id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn group_doors<S, C>(
    State(engine): Shared<S, C>,
    Path(id): Path<GroupId>,
) -> ApiResult<Response>
where
    S: Store + 'static,
    C: DoorController + 'static,
{
    let doors = blocking(engine, move |engine| Ok(engine.doors_in_group(&id))).await?;
    Ok(Json(doors).into_response())
}

async fn group_users<S, C>(
    State(engine): Shared<S, C>,
    Path(id): Path<GroupId>,
) -> ApiResult<Response>
where
    S: Store + 'static,
    C: DoorController + 'static,
{
    let users = blocking(engine, move |engine| Ok(engine.users_for_group(&id))).await?;
    Ok(Json(users).into_response())
}

async fn list_doors<S, C>(State(engine): Shared<S, C>) -> ApiResult<Response>
where
    S: Store + 'static,
    C: DoorController + 'static,
{
    let doors = blocking(engine, |engine| Ok(engine.doors())).await?;
    Ok(Json(doors).into_response())
}

async fn create_door<S, C>(
    State(engine): Shared<S, C>,
    Json(input): Json<NewDoor>,
) -> ApiResult<Response>
where
    S: Store + 'static,
    C: DoorController + 'static,
{
    let door = blocking(engine, move |engine| engine.create_door(input)).await?;
    Ok((StatusCode::CREATED, Json(door)).into_response())
}

async fn get_door<S, C>(
    State(engine): Shared<S, C>,
    Path(id): Path<DoorId>,
) -> ApiResult<Response>
where
    S: Store + 'static,
    C: DoorController + 'static,
{
    let door = blocking(engine, move |engine| engine.door(&id)).await?;
    Ok(Json(door).into_response())
}

async fn update_door<S, C>(
    State(engine): Shared<S, C>,
    Path(id): Path<DoorId>,
    Json(patch): Json<DoorPatch>,
) -> ApiResult<Response>
where
    S: Store + 'static,
    C: DoorController + 'static,
{
    let door = blocking(engine, move |engine| engine.update_door(&id, patch)).await?;
    Ok(Json(door).into_response())
}

async fn delete_door<S, C>(
    State(engine): Shared<S, C>,
    Path(id): Path<DoorId>,
) -> ApiResult<StatusCode>
where
    S: Store + 'static,
    C: DoorController + 'static,
{
    blocking(engine, move |engine| engine.delete_door(&id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Optional body of a door-open call; a bare POST is a manual unlock.
#[derive(Debug, Default, Deserialize)]
struct OpenRequest {
    #[serde(default)]
    user_id: Option<UserId>,
    #[serde(default)]
    reason: Option<String>,
}

async fn open_door<S, C>(
    State(engine): Shared<S, C>,
    Path(id): Path<DoorId>,
    request: Option<Json<OpenRequest>>,
) -> ApiResult<Response>
where
    S: Store + 'static,
    C: DoorController + 'static,
{
    let request = request.map(|Json(request)| request).unwrap_or_default();
    let reason = request.reason.as_deref().unwrap_or("manual");
    let outcome = engine
        .open_door(&id, request.user_id.as_ref(), reason)
        .await?;
    Ok(Json(outcome).into_response())
}

async fn list_users<S, C>(State(engine): Shared<S, C>) -> ApiResult<Response>
where
    S: Store + 'static,
    C: DoorController + 'static,
{
    let users = blocking(engine, |engine| Ok(engine.users())).await?;
    Ok(Json(users).into_response())
}

/// Creates a user after the identity directory accepts its id.
async fn create_user<S, C>(
    State(engine): Shared<S, C>,
    Json(input): Json<NewUser>,
) -> ApiResult<Response>
where
    S: Store + 'static,
    C: DoorController + 'static,
{
    let verification = engine.verify_user(&input.id).await;
    if !verification.exists {
        return Err(ApiError::Unverified(verification.message));
    }
    let user = blocking(engine, move |engine| engine.create_user(input)).await?;
    Ok((StatusCode::CREATED, Json(user)).into_response())
}

async fn get_user<S, C>(
    State(engine): Shared<S, C>,
    Path(id): Path<UserId>,
) -> ApiResult<Response>
where
    S: Store + 'static,
    C: DoorController + 'static,
{
    let user = blocking(engine, move |engine| engine.user(&id)).await?;
    Ok(Json(user).into_response())
}

async fn update_user<S, C>(
    State(engine): Shared<S, C>,
    Path(id): Path<UserId>,
    Json(patch): Json<UserPatch>,
) -> ApiResult<Response>
where
    S: Store + 'static,
    C: DoorController + 'static,
{
    let user = blocking(engine, move |engine| engine.update_user(&id, patch)).await?;
    Ok(Json(user).into_response())
}

async fn delete_user<S, C>(
    State(engine): Shared<S, C>,
    Path(id): Path<UserId>,
) -> ApiResult<StatusCode>
where
    S: Store + 'static,
    C: DoorController + 'static,
{
    blocking(engine, move |engine| engine.delete_user(&id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn accessible_doors<S, C>(
    State(engine): Shared<S, C>,
    Path(id): Path<UserId>,
) -> ApiResult<Response>
where
    S: Store + 'static,
    C: DoorController + 'static,
{
    let doors = blocking(engine, move |engine| engine.resolve_accessible_doors(&id)).await?;
    Ok(Json(doors).into_response())
}

#[derive(Debug, Deserialize)]
struct DoorGrants {
    door_ids: Vec<DoorId>,
}

async fn authorize_doors<S, C>(
    State(engine): Shared<S, C>,
    Path(id): Path<UserId>,
    Json(grants): Json<DoorGrants>,
) -> ApiResult<Response>
where
    S: Store + 'static,
    C: DoorController + 'static,
{
    let user = blocking(engine, move |engine| {
        engine.authorize_user_for_doors(&id, grants.door_ids)
    })
    .await?;
    Ok(Json(user).into_response())
}

#[derive(Debug, Deserialize)]
struct GroupGrants {
    group_ids: Vec<GroupId>,
}

async fn authorize_groups<S, C>(
    State(engine): Shared<S, C>,
    Path(id): Path<UserId>,
    Json(grants): Json<GroupGrants>,
) -> ApiResult<Response>
where
    S: Store + 'static,
    C: DoorController + 'static,
{
    let user = blocking(engine, move |engine| {
        engine.authorize_user_for_groups(&id, grants.group_ids)
    })
    .await?;
    Ok(Json(user).into_response())
}

#[derive(Debug, Deserialize)]
struct FaceRequest {
    registered: bool,
}

async fn set_face<S, C>(
    State(engine): Shared<S, C>,
    Path(id): Path<UserId>,
    Json(request): Json<FaceRequest>,
) -> ApiResult<Response>
where
    S: Store + 'static,
    C: DoorController + 'static,
{
    let user = blocking(engine, move |engine| {
        engine.set_face_registered(&id, request.registered)
    })
    .await?;
    Ok(Json(user).into_response())
}

async fn verify_user<S, C>(State(engine): Shared<S, C>, Path(id): Path<UserId>) -> Response
where
    S: Store + 'static,
    C: DoorController + 'static,
{
    Json(engine.verify_user(&id).await).into_response()
}

#[derive(Debug, Deserialize)]
struct CheckRequest {
    user_id: UserId,
    door_id: DoorId,
}

async fn check_access<S, C>(
    State(engine): Shared<S, C>,
    Json(request): Json<CheckRequest>,
) -> ApiResult<Response>
where
    S: Store + 'static,
    C: DoorController + 'static,
{
    let decision = blocking(engine, move |engine| {
        Ok(engine.check_access(&request.user_id, &request.door_id))
    })
    .await?;
    Ok(Json(decision).into_response())
}

async fn recognition<S, C>(
    State(engine): Shared<S, C>,
    Json(event): Json<RecognitionEvent>,
) -> Response
where
    S: Store + 'static,
    C: DoorController + 'static,
{
    Json(engine.process_recognition(event).await).into_response()
}

async fn access_logs<S, C>(
    State(engine): Shared<S, C>,
    Query(query): Query<LogQuery>,
) -> ApiResult<Response>
where
    S: Store + 'static,
    C: DoorController + 'static,
{
    let logs = blocking(engine, move |engine| Ok(engine.access_logs(&query))).await?;
    Ok(Json(logs).into_response())
}

async fn stats<S, C>(State(engine): Shared<S, C>) -> ApiResult<Response>
where
    S: Store + 'static,
    C: DoorController + 'static,
{
    let stats = blocking(engine, |engine| Ok(engine.stats())).await?;
    Ok(Json(stats).into_response())
}
