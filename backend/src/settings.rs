// SPDX-FileCopyrightText: 2026 Haven Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use serde::Deserialize;

/// Configuration for the server.
#[derive(Deserialize, Clone, Debug)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub database: DatabaseSettings,
    pub auth: AuthSettings,
    #[serde(default)]
    pub limits: LimitSettings,
}

/// Configuration for the application.
#[derive(Deserialize, Clone, Debug)]
pub struct ApplicationSettings {
    /// Display name of this deployment.
    pub server_name: String,
    pub host: String,
    pub port: u16,
}

impl ApplicationSettings {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration for the database.
#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseSettings {
    /// Path of the SQLite database file; WAL auxiliary files live next to it.
    pub path: String,
}

/// Origin binding and lifetimes for the credential ceremonies and sessions.
/// Credentials registered under one relying-party id are unusable against
/// another.
#[derive(Deserialize, Clone, Debug)]
pub struct AuthSettings {
    pub rp_id: String,
    pub rp_display_name: String,
    pub rp_origins: Vec<String>,
    /// Session lifetime in seconds. Default is 30 days.
    #[serde(default = "default_session_lifetime")]
    pub session_lifetime_secs: i64,
    /// Registration challenges expire after this many seconds.
    #[serde(default = "default_registration_ttl")]
    pub registration_challenge_ttl_secs: i64,
    /// Login challenges expire after this many seconds.
    #[serde(default = "default_login_ttl")]
    pub login_challenge_ttl_secs: i64,
    /// Uploaded key packages expire after this many seconds. Default is 30
    /// days.
    #[serde(default = "default_key_package_lifetime")]
    pub key_package_lifetime_secs: i64,
}

/// Transport and traffic bounds.
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct LimitSettings {
    /// Maximum envelope size in bytes; oversize frames close the connection.
    pub max_message_size: usize,
    /// Depth of each connection's outbound queue; overflow closes the
    /// connection.
    pub outbound_queue_depth: usize,
    /// Seconds a connection may stay unauthenticated before it is closed.
    pub auth_deadline_secs: u64,
    /// Interval between server-initiated pings, in seconds.
    pub heartbeat_interval_secs: u64,
    /// Seconds to wait for a pong before closing the connection.
    pub pong_timeout_secs: u64,
    /// Baseline per-connection rate limit, requests per second.
    pub rate_limit_per_sec: u64,
    /// Messages older than this many seconds are swept. Zero disables the
    /// sweep.
    pub message_retention_secs: i64,
    /// Interval between maintenance sweeps, in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_message_size: 65_536,
            outbound_queue_depth: 64,
            auth_deadline_secs: 10,
            heartbeat_interval_secs: 30,
            pong_timeout_secs: 10,
            rate_limit_per_sec: 10,
            message_retention_secs: 0,
            sweep_interval_secs: 60,
        }
    }
}

fn default_session_lifetime() -> i64 {
    60 * 60 * 24 * 30
}

fn default_registration_ttl() -> i64 {
    60
}

fn default_login_ttl() -> i64 {
    30
}

fn default_key_package_lifetime() -> i64 {
    60 * 60 * 24 * 30
}
