// SPDX-FileCopyrightText: 2026 Haven Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Code shared between the haven backend and the server binary: opaque
//! identifiers, the versioned persistence codec and the wire protocol.

pub mod codec;
pub mod identifiers;
pub mod protocol;
pub mod time;
