//! Transport-agnostic replication primitives.
//!
//! Three primitives sit underneath every higher layer:
//! - owner to server directed calls ([`Outbox::send_to_server`]),
//! - server to all (or all but one) broadcasts ([`Outbox::broadcast`]),
//! - single-writer values with change notification ([`ReplicatedScalar`]).
//!
//! The outbox is drained by whatever transport the process runs; the core never
//! sees sockets or framing.

use crate::entity::ClientId;
use crate::protocol::Packet;
use std::collections::VecDeque;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReplicationError {
    #[error("only the server may write a replicated value")]
    NotAuthority,
    #[error("the server never predicts its own replicated values")]
    AuthorityCannotPredict,
}

/// Visible value before and after an authoritative update.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarChange<T> {
    pub previous: T,
    pub current: T,
}

/// A value exclusively written by the server and read by everybody.
///
/// The server copy is created with [`ReplicatedScalar::authoritative`] and queues
/// a change notification whenever [`set`](Self::set) alters it. Every other
/// process holds a [`mirror`](Self::mirror), which only accepts values through
/// [`receive`](Self::receive). A mirror may carry a local prediction that is
/// shown instead of the confirmed value until the next authoritative update
/// discards it.
#[derive(Debug, Clone)]
pub struct ReplicatedScalar<T> {
    value: T,
    predicted: Option<T>,
    revision: u32,
    authority: bool,
    dirty: bool,
}

impl<T: Clone + PartialEq> ReplicatedScalar<T> {
    pub fn authoritative(value: T) -> Self {
        Self {
            value,
            predicted: None,
            revision: 0,
            authority: true,
            dirty: false,
        }
    }

    pub fn mirror(value: T) -> Self {
        Self {
            value,
            predicted: None,
            revision: 0,
            authority: false,
            dirty: false,
        }
    }

    /// The value to display: the pending prediction if any, else the confirmed value.
    pub fn get(&self) -> &T {
        self.predicted.as_ref().unwrap_or(&self.value)
    }

    /// Last value confirmed by the server.
    pub fn confirmed(&self) -> &T {
        &self.value
    }

    pub fn is_authority(&self) -> bool {
        self.authority
    }

    pub fn is_predicted(&self) -> bool {
        self.predicted.is_some()
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    /// Server-side write. Returns whether the value changed.
    pub fn set(&mut self, value: T) -> Result<bool, ReplicationError> {
        if !self.authority {
            return Err(ReplicationError::NotAuthority);
        }
        if self.value == value {
            return Ok(false);
        }
        self.value = value;
        self.revision = self.revision.wrapping_add(1);
        self.dirty = true;
        Ok(true)
    }

    /// Marks the current value for re-broadcast without changing it, e.g. after
    /// a pooled instance is re-spawned for new observers.
    pub fn touch(&mut self) {
        if self.authority {
            self.revision = self.revision.wrapping_add(1);
            self.dirty = true;
        }
    }

    /// Overwrites the local view with an advisory guess.
    pub fn predict(&mut self, value: T) -> Result<(), ReplicationError> {
        if self.authority {
            return Err(ReplicationError::AuthorityCannotPredict);
        }
        self.predicted = Some(value);
        Ok(())
    }

    /// Drops the prediction, falling back to the confirmed value.
    /// Returns whether the visible value changed.
    pub fn discard_prediction(&mut self) -> bool {
        match self.predicted.take() {
            Some(predicted) => predicted != self.value,
            None => false,
        }
    }

    /// Applies an authoritative notification on a mirror.
    ///
    /// Stale revisions are ignored. Any prediction is discarded. Returns the
    /// visible change, if the displayed value differs afterwards.
    pub fn receive(&mut self, revision: u32, value: T) -> Option<ScalarChange<T>> {
        if self.authority {
            return None;
        }
        if revision != 0 && self.revision != 0 && !revision_newer(revision, self.revision) {
            return None;
        }
        let previous = self.get().clone();
        self.value = value;
        self.revision = revision;
        self.predicted = None;
        if previous == self.value {
            None
        } else {
            Some(ScalarChange {
                previous,
                current: self.value.clone(),
            })
        }
    }

    /// Server-side: takes the pending change notification, if any.
    pub fn take_change(&mut self) -> Option<(u32, T)> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        Some((self.revision, self.value.clone()))
    }
}

/// Wrapping comparison so long sessions survive revision overflow.
fn revision_newer(candidate: u32, current: u32) -> bool {
    candidate != current && candidate.wrapping_sub(current) < u32::MAX / 2
}

/// A message queued for the transport.
#[derive(Debug, Clone)]
pub enum Outbound {
    ToServer(Packet),
    ToClient { client: ClientId, packet: Packet },
    Broadcast { packet: Packet, exclude: Option<ClientId> },
}

impl Outbound {
    pub fn packet(&self) -> &Packet {
        match self {
            Outbound::ToServer(packet) => packet,
            Outbound::ToClient { packet, .. } => packet,
            Outbound::Broadcast { packet, .. } => packet,
        }
    }

    /// Whether a server-originated message reaches `client`.
    pub fn delivers_to(&self, client: ClientId) -> bool {
        match self {
            Outbound::ToServer(_) => false,
            Outbound::ToClient { client: target, .. } => *target == client,
            Outbound::Broadcast { exclude, .. } => *exclude != Some(client),
        }
    }
}

/// Ordered queue of outgoing messages. Order of insertion is order of delivery.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: VecDeque<Outbound>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send_to_server(&mut self, packet: Packet) {
        self.queue.push_back(Outbound::ToServer(packet));
    }

    pub fn send_to_client(&mut self, client: ClientId, packet: Packet) {
        self.queue.push_back(Outbound::ToClient { client, packet });
    }

    pub fn broadcast(&mut self, packet: Packet) {
        self.queue.push_back(Outbound::Broadcast {
            packet,
            exclude: None,
        });
    }

    pub fn broadcast_except(&mut self, packet: Packet, exclude: ClientId) {
        self.queue.push_back(Outbound::Broadcast {
            packet,
            exclude: Some(exclude),
        });
    }

    pub fn drain(&mut self) -> impl Iterator<Item = Outbound> + '_ {
        self.queue.drain(..)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Outbound> {
        self.queue.iter()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
