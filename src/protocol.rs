//! Protocol decisions shared by the blocking and async clients: id
//! sequencing, the auth verdict, and response-to-request correlation.
//! Nothing in here touches a socket.

use std::collections::HashMap;
use std::hash::Hash;

use crate::{
    error::RconError,
    packet::{Packet, PacketType},
};

/// The correlation id used for the authentication request. The sequence
/// is reset on every connect, so auth always goes out as id 0 and the
/// first command as id 1.
pub(crate) const AUTH_ID: i32 = 0;

/// Monotone counter for correlation ids. Wraps to 0 before it would
/// overflow a signed 32-bit integer, leaving the full positive range as
/// collision-free headroom within any realistic batch.
#[derive(Debug, Default)]
pub(crate) struct IdSequence {
    current: i32,
}

impl IdSequence {
    pub(crate) fn reset(&mut self) {
        self.current = AUTH_ID;
    }

    pub(crate) fn next(&mut self) -> i32 {
        if self.current == i32::MAX {
            self.current = 0;
        } else {
            self.current += 1;
        }
        self.current
    }
}

/// Check the server's reply to an auth request. The `-1` failure
/// sentinel wins over everything else, then the reply must be an auth
/// response echoing the id we authenticated under.
pub(crate) fn verify_auth(reply: &Packet) -> Result<(), RconError> {
    if reply.id() == -1 {
        return Err(RconError::InvalidPassword);
    }
    if reply.packet_type() != PacketType::AuthResponse {
        return Err(RconError::UnexpectedType);
    }
    if reply.id() != AUTH_ID {
        return Err(RconError::UnexpectedId(reply.id()));
    }
    Ok(())
}

/// The set of correlation ids still awaiting a response within one batch,
/// mapped back to the caller's keys. Lives only for the duration of a
/// single `send_commands` call.
#[derive(Debug)]
pub(crate) struct PendingBatch<K> {
    pending: HashMap<i32, K>,
    results: HashMap<K, Option<String>>,
}

impl<K: Eq + Hash> PendingBatch<K> {
    pub(crate) fn new() -> Self {
        PendingBatch {
            pending: HashMap::new(),
            results: HashMap::new(),
        }
    }

    pub(crate) fn expect(&mut self, id: i32, key: K) {
        self.pending.insert(id, key);
    }

    pub(crate) fn is_done(&self) -> bool {
        self.pending.is_empty()
    }

    /// Match one incoming packet against the outstanding set. Responses
    /// may arrive in any order; only the id matters.
    pub(crate) fn resolve(&mut self, packet: &Packet) -> Result<(), RconError> {
        let key = self
            .pending
            .remove(&packet.id())
            .ok_or(RconError::UnexpectedId(packet.id()))?;
        if packet.packet_type() != PacketType::Response {
            return Err(RconError::UnexpectedType);
        }
        self.results.insert(key, packet.output().map(str::to_owned));
        Ok(())
    }

    pub(crate) fn into_results(self) -> HashMap<K, Option<String>> {
        self.results
    }
}
