// SPDX-FileCopyrightText: 2026 Haven Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::Arc;

use havenbackend::{auth::AuthService, hub::Hub, store::Store};
use havenserver::{configurations::get_configuration, run, telemetry::init_telemetry};
use tracing::info;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry("havenserver", "info");

    // Load configuration
    let settings = get_configuration("server/").expect("Could not load configuration.");

    let store = Store::open(&settings.database.path)
        .await
        .expect("Failed to open the database.");
    let auth = AuthService::new(store.clone(), settings.auth.clone())
        .expect("Invalid relying party configuration.");
    let hub = Arc::new(Hub::new());

    let listener = tokio::net::TcpListener::bind(settings.application.listen_addr()).await?;
    info!(
        server_name = %settings.application.server_name,
        addr = %listener.local_addr()?,
        "Starting server"
    );

    // A ctrl-c stops the hub, which closes every connection and ends the
    // accept loop.
    let shutdown_hub = hub.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shutdown_hub.stop().await;
        }
    });

    run(listener, store, auth, hub, settings).await
}
