// SPDX-FileCopyrightText: 2026 Haven Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The connection hub: owns the set of live authenticated connections and
//! indexes them by user, so a user may be connected from several devices.
//!
//! Fan-out never blocks: a send snapshots the user's connection handles in a
//! short critical section and then enqueues into each connection's bounded
//! outbound queue outside of it. A full queue marks that connection
//! overloaded and cancels it; slow consumers are dropped, senders never
//! wait. Ordering is guaranteed per connection only.

use std::collections::HashMap;

use havencommon::{
    identifiers::{ConnectionId, UserId},
    protocol::Envelope,
};
use tokio::sync::{Mutex, mpsc, mpsc::error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A cheap handle to one live connection: the outbound queue plus the
/// cancellation token that tears the connection down.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    connection_id: ConnectionId,
    user_id: UserId,
    outbound: mpsc::Sender<Envelope>,
    cancellation: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(
        connection_id: ConnectionId,
        user_id: UserId,
        outbound: mpsc::Sender<Envelope>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            connection_id,
            user_id,
            outbound,
            cancellation,
        }
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Non-blocking enqueue into the connection's outbound queue. Overflow
    /// closes the connection instead of ever blocking the sender.
    pub fn enqueue(&self, envelope: Envelope) -> bool {
        match self.outbound.try_send(envelope) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    connection_id = %self.connection_id,
                    user_id = %self.user_id,
                    "outbound queue overflow, dropping slow consumer"
                );
                self.cancellation.cancel();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Requests teardown of the connection. Idempotent.
    pub fn close(&self) {
        self.cancellation.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

#[derive(Debug, Default)]
pub struct Hub {
    connections: Mutex<HashMap<UserId, HashMap<ConnectionId, ConnectionHandle>>>,
    shutdown: CancellationToken,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// The hub's root cancellation token. Connection tokens are children of
    /// this, so stopping the hub tears every connection down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Adds an authenticated connection to the registry.
    pub async fn register(&self, handle: ConnectionHandle) {
        if self.shutdown.is_cancelled() {
            handle.close();
            return;
        }
        debug!(
            connection_id = %handle.connection_id(),
            user_id = %handle.user_id(),
            "registering connection"
        );
        let mut connections = self.connections.lock().await;
        connections
            .entry(handle.user_id().clone())
            .or_default()
            .insert(handle.connection_id().clone(), handle);
    }

    /// Removes a connection from the registry. Idempotent; removing an
    /// unknown connection is a no-op.
    pub async fn unregister(&self, user_id: &UserId, connection_id: &ConnectionId) {
        let mut connections = self.connections.lock().await;
        if let Some(handles) = connections.get_mut(user_id) {
            handles.remove(connection_id);
            if handles.is_empty() {
                connections.remove(user_id);
            }
        }
    }

    /// Number of registered connections.
    pub async fn count(&self) -> usize {
        let connections = self.connections.lock().await;
        connections.values().map(HashMap::len).sum()
    }

    pub async fn is_online(&self, user_id: &UserId) -> bool {
        let connections = self.connections.lock().await;
        connections.contains_key(user_id)
    }

    /// Enqueues the envelope to every connection of the user. Returns the
    /// number of connections that accepted it.
    pub async fn send_to_user(&self, user_id: &UserId, envelope: &Envelope) -> usize {
        let handles = self.snapshot_user(user_id).await;
        handles
            .iter()
            .filter(|handle| handle.enqueue(envelope.clone()))
            .count()
    }

    /// Enqueues the envelope to every connection of each listed user.
    pub async fn send_to_users(&self, user_ids: &[UserId], envelope: &Envelope) -> usize {
        let handles = {
            let connections = self.connections.lock().await;
            user_ids
                .iter()
                .filter_map(|user_id| connections.get(user_id))
                .flat_map(|handles| handles.values().cloned())
                .collect::<Vec<_>>()
        };
        handles
            .iter()
            .filter(|handle| handle.enqueue(envelope.clone()))
            .count()
    }

    /// Runs until the hub is stopped, then closes all connections.
    pub async fn run(&self) {
        self.shutdown.cancelled().await;
        self.close_all().await;
    }

    /// Stops the hub: cancels every connection and clears the registry.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.close_all().await;
    }

    async fn close_all(&self) {
        let mut connections = self.connections.lock().await;
        let drained: Vec<_> = connections
            .drain()
            .flat_map(|(_, handles)| handles.into_values())
            .collect();
        drop(connections);
        info!(count = drained.len(), "closing all connections");
        for handle in drained {
            handle.close();
        }
    }

    /// Snapshot of the user's connection handles; the registry lock is held
    /// only for the copy, never during I/O.
    async fn snapshot_user(&self, user_id: &UserId) -> Vec<ConnectionHandle> {
        let connections = self.connections.lock().await;
        connections
            .get(user_id)
            .map(|handles| handles.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests;
