use axum::{
    extract::{Path, State},
    Json,
};

use crate::api::{state::AppState, types::*};
use crate::domain::ImageDefinition;

/// PUT /:catalog/image/:image
pub async fn put_image(
    State(state): State<AppState>,
    Path((catalog, image)): Path<(String, String)>,
    Json(definition): Json<ImageDefinition>,
) -> ApiResult<Json<EmptyResponse>> {
    state.manager.put_image(&catalog, &image, definition).await?;
    Ok(Json(EmptyResponse::default()))
}

/// GET /:catalog/image/:image
pub async fn get_image(
    State(state): State<AppState>,
    Path((catalog, image)): Path<(String, String)>,
) -> ApiResult<Json<ImageDefinition>> {
    Ok(Json(state.manager.get_image(&catalog, &image).await?))
}

/// DELETE /:catalog/image/:image
pub async fn delete_image(
    State(state): State<AppState>,
    Path((catalog, image)): Path<(String, String)>,
) -> ApiResult<Json<EmptyResponse>> {
    state.manager.delete_image(&catalog, &image).await?;
    Ok(Json(EmptyResponse::default()))
}

/// GET /:catalog/images
pub async fn list_images(
    State(state): State<AppState>,
    Path(catalog): Path<String>,
) -> ApiResult<Json<Vec<ImageDefinition>>> {
    Ok(Json(state.manager.list_images(&catalog).await?))
}
