// SPDX-FileCopyrightText: 2026 Haven Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Periodic retention sweeping: expired sessions, challenges and key
//! packages always, aged messages when a retention period is configured.

use std::time::Duration;

use havenbackend::{settings::LimitSettings, store::Store};
use havencommon::time;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub(crate) async fn sweep_loop(store: Store, limits: LimitSettings, shutdown: CancellationToken) {
    let period = Duration::from_secs(limits.sweep_interval_secs.max(1));
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => sweep_once(&store, &limits).await,
        }
    }
}

async fn sweep_once(store: &Store, limits: &LimitSettings) {
    report("sessions", store.delete_expired_sessions().await);
    report("challenges", store.delete_expired_challenges().await);
    report("key packages", store.delete_expired_key_packages().await);

    if limits.message_retention_secs > 0 {
        let cutoff = time::now_micros() - limits.message_retention_secs * 1_000_000;
        report("messages", store.delete_expired_messages(cutoff).await);
    }
}

fn report(entity: &str, result: Result<u64, havenbackend::errors::StoreError>) {
    match result {
        Ok(0) => {}
        Ok(count) => info!(count, entity, "swept expired rows"),
        Err(e) => warn!(entity, error = %e, "sweep failed"),
    }
}
