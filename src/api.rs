use crate::auth::{AuthUser, SharedState};
use crate::world::{Priority, Punishment, Task, Tomato, WorldError};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

// ── Request types ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: Priority,
    pub due_time: Option<DateTime<Utc>>,
}

fn default_priority() -> Priority {
    Priority::Medium
}

/// Full replace — matches the update semantics of the engine, not a patch.
#[derive(Debug, Deserialize)]
pub struct UpdateTaskRequest {
    pub title: String,
    pub description: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: Priority,
    pub due_time: Option<DateTime<Utc>>,
}

// ── Error mapping ──────────────────────────────────────────────

fn reject(e: WorldError) -> (StatusCode, String) {
    let status = match e {
        WorldError::TitleRequired => StatusCode::BAD_REQUEST,
        WorldError::TaskNotFound => StatusCode::NOT_FOUND,
        WorldError::NotOwner => StatusCode::FORBIDDEN,
    };
    (status, e.to_string())
}

fn internal(e: impl std::fmt::Display) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

// ── Task handlers ──────────────────────────────────────────────

// GET /api/tasks
pub async fn list_tasks(
    State(state): State<SharedState>,
    auth: AuthUser,
) -> Json<Vec<Task>> {
    let world = state.world.read().unwrap();
    let tasks = world.tasks_for(auth.id).into_iter().cloned().collect();
    Json(tasks)
}

// POST /api/tasks
pub async fn create_task(
    State(state): State<SharedState>,
    auth: AuthUser,
    Json(payload): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<Task>), (StatusCode, String)> {
    let mut world = state.world.write().unwrap();

    let event = world
        .create_task(
            auth.id,
            payload.title,
            payload.description,
            payload.priority,
            payload.due_time,
        )
        .map_err(reject)?;
    state.save_file.flush(&world, &event).map_err(internal)?;

    let task = match event {
        crate::world::Event::TaskCreated { task, .. } => task,
        _ => unreachable!(),
    };
    Ok((StatusCode::CREATED, Json(task)))
}

// PUT /api/tasks/:id
pub async fn update_task(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateTaskRequest>,
) -> Result<Json<Task>, (StatusCode, String)> {
    let mut world = state.world.write().unwrap();

    let event = world
        .update_task(
            auth.id,
            id,
            payload.title,
            payload.description,
            payload.priority,
            payload.due_time,
        )
        .map_err(reject)?;
    state.save_file.flush(&world, &event).map_err(internal)?;

    Ok(Json(world.tasks[&id].clone()))
}

// PUT /api/tasks/:id/complete
pub async fn complete_task(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, (StatusCode, String)> {
    let mut world = state.world.write().unwrap();

    // None = already completed; answer with the task as-is, nothing to flush
    if let Some(event) = world.complete_task(auth.id, id).map_err(reject)? {
        state.save_file.flush(&world, &event).map_err(internal)?;
    }

    Ok(Json(world.tasks[&id].clone()))
}

// DELETE /api/tasks/:id
pub async fn delete_task(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    let mut world = state.world.write().unwrap();

    let event = world.delete_task(auth.id, id).map_err(reject)?;
    state.save_file.flush(&world, &event).map_err(internal)?;

    Ok(StatusCode::NO_CONTENT)
}

// ── Tomato handlers ────────────────────────────────────────────

// GET /api/tomatoes/count
pub async fn tomato_count(State(state): State<SharedState>, auth: AuthUser) -> Json<u64> {
    let world = state.world.read().unwrap();
    Json(world.tomato_count(auth.id) as u64)
}

// GET /api/tomatoes/history
pub async fn tomato_history(
    State(state): State<SharedState>,
    auth: AuthUser,
) -> Json<Vec<Tomato>> {
    let world = state.world.read().unwrap();
    let tomatoes = world.tomato_history(auth.id).into_iter().cloned().collect();
    Json(tomatoes)
}

// ── Punishment handlers ────────────────────────────────────────

// GET /api/punishments
pub async fn list_punishments(
    State(state): State<SharedState>,
    auth: AuthUser,
) -> Json<Vec<Punishment>> {
    let world = state.world.read().unwrap();
    let punishments = world.punishments_for(auth.id).into_iter().cloned().collect();
    Json(punishments)
}

// GET /api/punishments/active
pub async fn active_punishments(
    State(state): State<SharedState>,
    auth: AuthUser,
) -> Json<Vec<Punishment>> {
    let world = state.world.read().unwrap();
    let punishments = world
        .unresolved_punishments(auth.id)
        .into_iter()
        .cloned()
        .collect();
    Json(punishments)
}
