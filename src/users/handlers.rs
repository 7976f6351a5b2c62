use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tracing::{debug, info, instrument};

use crate::{
    error::ApiError,
    state::AppState,
    users::{
        dto::{CreateUserRequest, UpdateUserRequest, UserListResponse},
        repo::UserError,
        repo_types::User,
    },
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/:id",
            get(get_user)
                .put(update_user)
                .patch(update_user)
                .delete(delete_user),
        )
}

#[instrument(skip(state))]
pub async fn list_users(State(state): State<AppState>) -> Json<UserListResponse> {
    let users = state.users.get_all();
    let count = users.len();
    Json(UserListResponse { users, count })
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<User>, ApiError> {
    match state.users.get_by_id(&id) {
        Ok(user) => Ok(Json(user)),
        Err(UserError::NotFound) => {
            debug!(user_id = %id, "user not found");
            Err(UserError::NotFound.into())
        }
        Err(e) => Err(e.into()),
    }
}

#[instrument(skip(state, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;
    payload.validate()?;

    let user = state.users.create(&payload.email, &payload.name)?;
    info!(user_id = %user.id, email = %user.email, "user created");

    let location = format!("/api/v1/users/{}", user.id);
    Ok((StatusCode::CREATED, [(header::LOCATION, location)], Json(user)))
}

#[instrument(skip(state, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> Result<Json<User>, ApiError> {
    let Json(payload) = payload?;
    let changes = payload.into_update()?;

    let user = state.users.update(&id, changes)?;
    info!(user_id = %user.id, "user updated");
    Ok(Json(user))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.users.delete(&id)?;
    info!(user_id = %id, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}
