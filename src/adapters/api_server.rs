use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::api::{create_router, AppState};
use crate::broker::BrokerManager;
use crate::config::ServerConfig;
use crate::error::Result;

/// Serve the broker API until `shutdown` resolves.
pub async fn start_api_server<F>(
    manager: Arc<BrokerManager>,
    server: &ServerConfig,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(AppState::new(manager, server));

    let addr = server.bind_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("broker API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("broker API stopped");
    Ok(())
}
