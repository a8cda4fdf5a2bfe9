// SPDX-FileCopyrightText: 2026 Haven Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The haven server binary: configuration, telemetry and the TCP listener
//! that feeds accepted connections into the backend's hub and router.

use std::sync::Arc;

use havenbackend::{
    auth::AuthService, hub::Hub, router::Router, settings::Settings, store::Store,
};
use tokio::net::TcpListener;
use tracing::{info, warn};

pub mod configurations;
pub mod telemetry;

mod connection;
mod maintenance;

/// Accepts connections until the hub is stopped. Each accepted socket gets
/// its own reader and writer task; a maintenance task sweeps expired state
/// in the background.
pub async fn run(
    listener: TcpListener,
    store: Store,
    auth: AuthService,
    hub: Arc<Hub>,
    settings: Settings,
) -> std::io::Result<()> {
    let router = Arc::new(Router::new(
        store.clone(),
        auth,
        hub.clone(),
        settings.auth.key_package_lifetime_secs,
    ));
    let shutdown = hub.shutdown_token();

    let hub_task = {
        let hub = hub.clone();
        tokio::spawn(async move { hub.run().await })
    };
    let maintenance = tokio::spawn(maintenance::sweep_loop(
        store.clone(),
        settings.limits.clone(),
        shutdown.clone(),
    ));

    info!(addr = %listener.local_addr()?, "listening");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let router = router.clone();
                        let limits = settings.limits.clone();
                        tokio::spawn(connection::serve_connection(router, limits, stream, peer));
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
        }
    }

    let _ = maintenance.await;
    let _ = hub_task.await;
    store.close().await;
    info!("server stopped");
    Ok(())
}
