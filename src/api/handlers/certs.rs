use axum::{
    extract::{Path, State},
    Json,
};

use crate::api::{state::AppState, types::*};
use crate::domain::BrokerCerts;

/// PUT /certificate/:host
pub async fn put_certs(
    State(state): State<AppState>,
    Path(host): Path<String>,
    Json(certs): Json<BrokerCerts>,
) -> ApiResult<Json<EmptyResponse>> {
    state.manager.add_certs(&host, certs).await?;
    Ok(Json(EmptyResponse::default()))
}

/// GET /certificate/:host -- PEM bytes are replaced by their lengths
pub async fn get_certs(
    State(state): State<AppState>,
    Path(host): Path<String>,
) -> ApiResult<Json<BrokerCerts>> {
    Ok(Json(state.manager.get_certs(&host).await?))
}

/// DELETE /certificate/:host
pub async fn delete_certs(
    State(state): State<AppState>,
    Path(host): Path<String>,
) -> ApiResult<Json<EmptyResponse>> {
    state.manager.delete_certs(&host).await?;
    Ok(Json(EmptyResponse::default()))
}

/// GET /certificates
pub async fn list_certs(State(state): State<AppState>) -> ApiResult<Json<Vec<BrokerCerts>>> {
    Ok(Json(state.manager.list_certs().await?))
}
