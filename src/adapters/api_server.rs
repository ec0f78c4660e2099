use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

use crate::api::{create_router, AppState};
use crate::error::{RelayError, Result};

/// Bind and serve the API until `shutdown` resolves
pub async fn start_api_server<F>(state: AppState, bind: &str, port: u16, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = format!("{bind}:{port}")
        .parse()
        .map_err(|e| RelayError::Validation(format!("invalid bind address {bind}:{port}: {e}")))?;

    let listener = TcpListener::bind(addr).await?;
    info!("API server listening on http://{}", addr);
    serve(listener, state, shutdown).await
}

/// Serve on an already bound listener
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("API server stopped");
    Ok(())
}
