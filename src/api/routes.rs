use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::{auth::require_broker_auth, handlers, state::AppState};

pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Service broker API
        .route("/v2/catalog", get(handlers::get_catalog))
        .route(
            "/v2/service_instances/:instance_id",
            put(handlers::provision).delete(handlers::deprovision),
        )
        .route(
            "/v2/service_instances/:instance_id/service_bindings/:binding_id",
            put(handlers::bind).delete(handlers::unbind),
        )
        // Agent heartbeat
        .route("/ping", post(handlers::ping))
        // Image definition admin
        .route(
            "/:catalog/image/:image",
            put(handlers::put_image)
                .get(handlers::get_image)
                .delete(handlers::delete_image),
        )
        .route("/:catalog/images", get(handlers::list_images))
        // Agent certificates
        .route(
            "/certificate/:host",
            put(handlers::put_certs)
                .get(handlers::get_certs)
                .delete(handlers::delete_certs),
        )
        .route("/certificates", get(handlers::list_certs))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_broker_auth,
        ))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
