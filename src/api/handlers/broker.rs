use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::api::{state::AppState, types::*};
use crate::domain::{BindingRequest, Catalog, Heartbeat, ProvisioningRequest};

/// GET /v2/catalog
pub async fn get_catalog(State(state): State<AppState>) -> ApiResult<Json<Catalog>> {
    Ok(Json(state.manager.catalog().await?))
}

/// PUT /v2/service_instances/:instance_id
pub async fn provision(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    Json(mut request): Json<ProvisioningRequest>,
) -> ApiResult<(StatusCode, Json<ProvisionResponse>)> {
    request.instance_id = instance_id;
    let dashboard_url = state.manager.provision(&request).await?;
    Ok((StatusCode::CREATED, Json(ProvisionResponse { dashboard_url })))
}

/// DELETE /v2/service_instances/:instance_id
pub async fn deprovision(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    Query(mut request): Query<ProvisioningRequest>,
) -> ApiResult<Json<EmptyResponse>> {
    request.instance_id = instance_id;
    state.manager.deprovision(&request).await?;
    Ok(Json(EmptyResponse::default()))
}

/// PUT /v2/service_instances/:instance_id/service_bindings/:binding_id
pub async fn bind(
    State(state): State<AppState>,
    Path((instance_id, binding_id)): Path<(String, String)>,
    Json(mut request): Json<BindingRequest>,
) -> ApiResult<(StatusCode, Json<BindResponse>)> {
    request.instance_id = instance_id;
    request.binding_id = binding_id;
    let result = state.manager.bind(&request).await?;
    Ok((
        StatusCode::CREATED,
        Json(BindResponse {
            credentials: result.credentials,
            syslog_drain_url: result.drain_url,
        }),
    ))
}

/// DELETE /v2/service_instances/:instance_id/service_bindings/:binding_id
pub async fn unbind(
    State(state): State<AppState>,
    Path((instance_id, binding_id)): Path<(String, String)>,
    Query(mut request): Query<BindingRequest>,
) -> ApiResult<Json<EmptyResponse>> {
    request.instance_id = instance_id;
    request.binding_id = binding_id;
    state.manager.unbind(&request).await?;
    Ok(Json(EmptyResponse::default()))
}

/// POST /ping
pub async fn ping(
    State(state): State<AppState>,
    Json(heartbeat): Json<Heartbeat>,
) -> ApiResult<Json<EmptyResponse>> {
    state.manager.ping(&heartbeat).await?;
    Ok(Json(EmptyResponse::default()))
}
