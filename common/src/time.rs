// SPDX-FileCopyrightText: 2026 Haven Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Timestamp helpers. Lifecycle timestamps (created_at, expires_at, ...) are
//! unix seconds; message ordering timestamps are unix microseconds.

use chrono::Utc;

pub fn now_secs() -> i64 {
    Utc::now().timestamp()
}

pub fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

pub fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}
