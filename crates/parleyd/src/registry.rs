use crate::metrics::counters;
use parking_lot::Mutex;
use parley_common::message::ServerMessage;
use parley_common::types::{Participant, ParticipantId, Profile, Status};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Identifies one accepted transport connection.
///
/// A participant that reconnects gets a new `ConnId`, which lets the old
/// connection's teardown recognise that it no longer owns the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(u64);

/// Handle held in the registry, used to push frames to a connection.
#[derive(Clone, Debug)]
pub struct ConnHandle {
    /// Queue drained by the connection task into its socket.
    pub tx: mpsc::Sender<String>,
    /// Connection this handle belongs to.
    pub conn_id: ConnId,
}

#[derive(Debug)]
struct Member {
    handle: ConnHandle,
    participant: Participant,
    /// Position in the roster; kept when the same id reconnects.
    joined: u64,
}

/// Registry contents. Only reachable through [`Registry`]'s lock.
#[derive(Debug, Default)]
pub(crate) struct Members {
    by_id: HashMap<ParticipantId, Member>,
    next_seq: u64,
}

/// Outcome of pushing one frame at a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued on the target's connection.
    Queued,
    /// Target is not registered.
    Offline,
    /// Target's outbound queue is full or closed; frame dropped.
    Congested,
}

fn encode(msg: &ServerMessage) -> Option<String> {
    match msg.encode() {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!(kind = msg.kind(), error = %e, "failed to encode frame");
            None
        }
    }
}

fn push(handle: &ConnHandle, frame: String) -> Delivery {
    match handle.tx.try_send(frame) {
        Ok(()) => Delivery::Queued,
        Err(TrySendError::Full(_)) => {
            counters::messages_dropped_total("queue_full");
            debug!(conn = ?handle.conn_id, "outbound queue full, dropping frame");
            Delivery::Congested
        }
        Err(TrySendError::Closed(_)) => {
            counters::messages_dropped_total("closed");
            Delivery::Congested
        }
    }
}

impl Members {
    pub(crate) fn contains(&self, id: ParticipantId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Whether `id` is registered and still served by `conn`.
    pub(crate) fn is_served_by(&self, id: ParticipantId, conn: ConnId) -> bool {
        self.by_id
            .get(&id)
            .is_some_and(|m| m.handle.conn_id == conn)
    }

    pub(crate) fn participant(&self, id: ParticipantId) -> Option<&Participant> {
        self.by_id.get(&id).map(|m| &m.participant)
    }

    fn roster(&self) -> Vec<Participant> {
        let mut members: Vec<&Member> = self.by_id.values().collect();
        members.sort_unstable_by_key(|m| m.joined);
        members.into_iter().map(|m| m.participant.clone()).collect()
    }

    /// Sends the full roster to every registered connection.
    pub(crate) fn broadcast_roster(&self) {
        let Some(frame) = encode(&ServerMessage::UserList(self.roster())) else {
            return;
        };
        counters::roster_broadcasts_total();
        for member in self.by_id.values() {
            push(&member.handle, frame.clone());
        }
    }

    /// Queues `msg` for `id`. Absent targets are a normal race, not an error.
    pub(crate) fn send_to(&self, id: ParticipantId, msg: &ServerMessage) -> Delivery {
        let Some(member) = self.by_id.get(&id) else {
            counters::messages_dropped_total("offline");
            return Delivery::Offline;
        };
        match encode(msg) {
            Some(frame) => push(&member.handle, frame),
            None => Delivery::Congested,
        }
    }

    /// Updates `id`'s status and rebroadcasts. No-op for unknown ids.
    pub(crate) fn set_status(&mut self, id: ParticipantId, status: Status) -> bool {
        let Some(member) = self.by_id.get_mut(&id) else {
            return false;
        };
        member.participant.status = status;
        self.broadcast_roster();
        true
    }
}

/// Live set of connected participants, their status, and their connections.
///
/// Each entry holds both the transport handle and the roster record, so the
/// two can never disagree. Every operation runs under one lock and performs
/// no I/O while holding it: frames are pushed with `try_send` onto
/// per-connection queues.
#[derive(Debug, Default)]
pub struct Registry {
    members: Mutex<Members>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a verified participant as available and broadcasts the
    /// roster to everyone, the newcomer included.
    ///
    /// An existing entry for the same id is replaced. The old handle is
    /// dropped, which closes its queue and makes its connection shut down.
    pub fn register(&self, profile: Profile, tx: mpsc::Sender<String>) -> ConnId {
        let id = profile.id;
        let mut members = self.members.lock();
        members.next_seq += 1;
        let seq = members.next_seq;
        let conn_id = ConnId(seq);
        let joined = members.by_id.get(&id).map_or(seq, |m| m.joined);

        let previous = members.by_id.insert(
            id,
            Member {
                handle: ConnHandle { tx, conn_id },
                participant: Participant::new(profile),
                joined,
            },
        );
        if let Some(previous) = previous {
            info!(participant = %id, old = ?previous.handle.conn_id, new = ?conn_id, "replacing existing connection");
        }
        members.broadcast_roster();
        conn_id
    }

    /// Removes `id` if it is still owned by `conn` and broadcasts the roster
    /// to whoever remains.
    ///
    /// Returns `false`, without broadcasting, when the id is absent or has
    /// since been taken over by a newer connection, so repeated or stale
    /// close notifications are harmless.
    pub fn deregister(&self, id: ParticipantId, conn: ConnId) -> bool {
        let mut members = self.members.lock();
        if !members.is_served_by(id, conn) {
            return false;
        }
        members.by_id.remove(&id);
        members.broadcast_roster();
        true
    }

    /// Sets `id`'s status and broadcasts the roster. No-op for unknown ids.
    pub fn set_status(&self, id: ParticipantId, status: Status) -> bool {
        self.members.lock().set_status(id, status)
    }

    /// Sends the full roster to every registered connection.
    pub fn broadcast_roster(&self) {
        self.members.lock().broadcast_roster();
    }

    /// Snapshot of the roster in registration order.
    #[must_use]
    pub fn roster(&self) -> Vec<Participant> {
        self.members.lock().roster()
    }

    /// Current status of `id`, if registered.
    #[must_use]
    pub fn status(&self, id: ParticipantId) -> Option<Status> {
        self.members.lock().participant(id).map(|p| p.status)
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: ParticipantId) -> bool {
        self.members.lock().contains(id)
    }

    /// Number of registered participants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.lock().by_id.len()
    }

    /// Returns `true` if nobody is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.lock().by_id.is_empty()
    }

    /// Runs `f` with exclusive access to the registry contents.
    pub(crate) fn with_members<R>(&self, f: impl FnOnce(&mut Members) -> R) -> R {
        f(&mut self.members.lock())
    }
}
