// SPDX-FileCopyrightText: 2026 Haven Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Opaque identifiers used across the store, the hub and the wire protocol.
//!
//! All identifiers are opaque strings. Most are freshly minted UUIDs; message
//! identifiers are 128-bit sortable identifiers whose lexicographic order
//! equals their creation order.

use std::{
    fmt::{Display, Formatter},
    sync::Mutex,
};

use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::time;

macro_rules! opaque_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            Serialize,
            Deserialize,
            sqlx::Type,
        )]
        #[sqlx(transparent)]
        pub struct $name(String);

        impl $name {
            /// Mints a fresh random identifier.
            pub fn random() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn new(value: String) -> Self {
                Self(value)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }
    };
}

opaque_id!(UserId);
opaque_id!(ConversationId);
opaque_id!(SessionId);
opaque_id!(ChallengeId);
opaque_id!(CredentialId);
opaque_id!(KeyPackageId);
opaque_id!(
    /// Identifies a single live connection; never persisted.
    ConnectionId
);

impl UserId {
    /// The UUID form of the identifier, needed by the credential ceremony.
    pub fn as_uuid(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.0).ok()
    }
}

/// Crockford base32, ascending in ASCII so that the encoded form sorts the
/// same way as the 128-bit value.
const ENCODING: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

const SUFFIX_BITS: u32 = 80;
const ENCODED_LEN: usize = 26;

/// A sortable message identifier: 48-bit millisecond timestamp followed by 80
/// bits of randomness, encoded as 26 characters of Crockford base32.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(transparent)]
pub struct MessageId(String);

impl MessageId {
    fn from_parts(millis: u64, suffix: u128) -> Self {
        let value = (u128::from(millis) << SUFFIX_BITS) | suffix;
        let mut encoded = String::with_capacity(ENCODED_LEN);
        for position in 0..ENCODED_LEN {
            let shift = 125 - 5 * position;
            let index = ((value >> shift) & 0x1f) as usize;
            encoded.push(ENCODING[index] as char);
        }
        Self(encoded)
    }

    pub fn new(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The millisecond timestamp prefix of the identifier.
    pub fn timestamp_millis(&self) -> Option<u64> {
        let mut millis: u64 = 0;
        for byte in self.0.bytes().take(10) {
            let digit = ENCODING.iter().position(|&c| c == byte)? as u64;
            millis = (millis << 5) | digit;
        }
        // The first character only carries 3 significant bits, so the loop
        // above accumulates 50 bits; the top two are always zero.
        Some(millis)
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Mints [`MessageId`]s that are strictly increasing across the process, even
/// for several identifiers within the same millisecond.
#[derive(Debug)]
pub struct MessageIdGenerator {
    last: Mutex<(u64, u128)>,
}

impl Default for MessageIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageIdGenerator {
    pub fn new() -> Self {
        Self {
            last: Mutex::new((0, 0)),
        }
    }

    pub fn generate(&self) -> MessageId {
        let now = time::now_millis();
        let mut last = self.last.lock().expect("message id generator poisoned");
        let (millis, suffix) = if now > last.0 {
            (now, random_suffix())
        } else {
            // Same or earlier millisecond (clock went backwards): bump the
            // suffix to keep the ordering strict.
            match last.1.checked_add(1) {
                Some(bumped) if bumped < 1 << SUFFIX_BITS => (last.0, bumped),
                _ => (last.0 + 1, random_suffix()),
            }
        };
        *last = (millis, suffix);
        MessageId::from_parts(millis, suffix)
    }
}

fn random_suffix() -> u128 {
    let mut bytes = [0u8; 10];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut suffix: u128 = 0;
    for byte in bytes {
        suffix = (suffix << 8) | u128::from(byte);
    }
    suffix
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_are_strictly_increasing() {
        let generator = MessageIdGenerator::new();
        let mut previous = generator.generate();
        for _ in 0..1000 {
            let next = generator.generate();
            assert!(next.as_str() > previous.as_str());
            previous = next;
        }
    }

    #[test]
    fn message_id_encodes_timestamp_prefix() {
        let id = MessageId::from_parts(1_700_000_000_000, 42);
        assert_eq!(id.as_str().len(), 26);
        assert_eq!(id.timestamp_millis(), Some(1_700_000_000_000));
    }

    #[test]
    fn lexicographic_order_follows_timestamp() {
        let earlier = MessageId::from_parts(1_000, u128::MAX >> 48);
        let later = MessageId::from_parts(1_001, 0);
        assert!(earlier.as_str() < later.as_str());
    }

    #[test]
    fn random_ids_are_distinct() {
        assert_ne!(UserId::random(), UserId::random());
    }
}
