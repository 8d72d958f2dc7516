//! Server and dispatcher wiring.

use std::sync::Arc;

use miette::Result;
use tracing::info;

use linkpost_scheduler::{Dispatcher, JobStore};
use linkpost_voyager::{PostingService, VoyagerClient};
use linkpost_web::{AppState, create_router};

use crate::DispatchArgs;

fn posting_service(dispatch: &DispatchArgs) -> Result<Arc<dyn PostingService>> {
    let client = VoyagerClient::new(dispatch.voyager_url.as_str())
        .map_err(|e| miette::miette!("failed to create Voyager client: {}", e))?;
    Ok(Arc::new(client))
}

/// Serve HTTP and dispatch due posts until ctrl-c.
pub async fn run(store: Arc<JobStore>, listen: &str, dispatch: &DispatchArgs) -> Result<()> {
    let service = posting_service(dispatch)?;

    let dispatcher = Dispatcher::new(Arc::clone(&store), Arc::clone(&service), dispatch.config()?)
        .map_err(|e| miette::miette!("{}", e))?;
    let dispatcher_handle = Arc::new(dispatcher).start();

    let router = create_router(Arc::new(AppState { store, service }));
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| miette::miette!("failed to bind {}: {}", listen, e))?;

    info!(listen = %listen, voyager_url = %dispatch.voyager_url, "linkpost started");

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Let an in-flight tick record its outcomes before exiting
    dispatcher_handle.stop().await;

    served.map_err(|e| miette::miette!("server error: {}", e))?;
    info!("linkpost stopped");
    Ok(())
}

/// Run a single dispatcher tick and report what it did.
pub async fn tick_once(store: Arc<JobStore>, dispatch: &DispatchArgs) -> Result<()> {
    let service = posting_service(dispatch)?;
    let dispatcher = Dispatcher::new(store, service, dispatch.config()?)
        .map_err(|e| miette::miette!("{}", e))?;

    let report = dispatcher
        .tick()
        .await
        .map_err(|e| miette::miette!("tick failed: {}", e))?;

    println!(
        "due {}, posted {}, failed {}, lost {}, unrecorded {}, reclaimed {}",
        report.due,
        report.posted,
        report.failed,
        report.lost,
        report.unrecorded,
        report.reclaimed
    );
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    info!("received shutdown signal");
}
