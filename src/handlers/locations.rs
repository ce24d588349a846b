use crate::{
    entities::location,
    errors::ServiceError,
    handlers::common::{created_response, success_response},
    services::locations::NewLocation,
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use uuid::Uuid;

pub fn location_routes() -> Router<AppState> {
    Router::new()
        .route("/locations", get(list_locations).post(create_location))
        .route("/locations/:id", get(get_location).delete(delete_location))
}

#[utoipa::path(
    get,
    path = "/api/v1/locations",
    responses(
        (status = 200, description = "Active locations ordered by name", body = [location::Model]),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse)
    ),
    tag = "Locations"
)]
pub async fn list_locations(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(state.locations.list_active_locations().await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/locations",
    request_body = NewLocation,
    responses(
        (status = 201, description = "Location created", body = location::Model),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 409, description = "An active location already has this name", body = crate::errors::ErrorResponse)
    ),
    tag = "Locations"
)]
pub async fn create_location(
    State(state): State<AppState>,
    Json(payload): Json<NewLocation>,
) -> Result<impl IntoResponse, ServiceError> {
    let created = state.locations.create_location(payload).await?;
    Ok(created_response(created))
}

#[utoipa::path(
    get,
    path = "/api/v1/locations/{id}",
    params(("id" = Uuid, Path, description = "Location ID")),
    responses(
        (status = 200, description = "Location returned", body = location::Model),
        (status = 404, description = "Not found or inactive", body = crate::errors::ErrorResponse)
    ),
    tag = "Locations"
)]
pub async fn get_location(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(state.locations.get_active_location(id).await?))
}

#[utoipa::path(
    delete,
    path = "/api/v1/locations/{id}",
    params(("id" = Uuid, Path, description = "Location ID")),
    responses(
        (status = 200, description = "Location deactivated", body = location::Model),
        (status = 404, description = "Not found or inactive", body = crate::errors::ErrorResponse)
    ),
    tag = "Locations"
)]
pub async fn delete_location(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(state.locations.deactivate_location(id).await?))
}
