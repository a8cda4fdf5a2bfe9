// SPDX-FileCopyrightText: 2026 Haven Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tracing bootstrap for the server binary.
//!
//! Events are emitted as bunyan-style JSON lines on stdout so a log
//! shipper can ingest them without a parsing stage. `RUST_LOG` overrides
//! the default filter; `log`-crate records from dependencies are routed
//! through the same pipeline.

use tracing::subscriber::set_global_default;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt};

/// Installs the global subscriber. Must be called once, before anything
/// emits an event; panics if telemetry is already initialised.
pub fn init_telemetry(service_name: &str, default_directives: &str) {
    LogTracer::init().expect("log-crate interop registered twice");

    let filter = resolve_filter(default_directives);
    let subscriber = Registry::default()
        .with(filter)
        .with(JsonStorageLayer)
        .with(BunyanFormattingLayer::new(
            service_name.to_owned(),
            std::io::stdout,
        ));
    set_global_default(subscriber).expect("global tracing subscriber registered twice");
}

/// `RUST_LOG` wins when it is set and parses; otherwise the caller's
/// default directives apply.
fn resolve_filter(default_directives: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives))
}
