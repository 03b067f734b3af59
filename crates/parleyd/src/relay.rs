//! Signaling dispatch: call lifecycle transitions and verbatim relaying.

use crate::registry::{ConnId, Delivery, Registry};
use parley_common::message::{ClientMessage, IncomingCall, Origin, ServerMessage};
use parley_common::types::{ParticipantId, Status};
use tracing::{debug, info};

/// What became of a routed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// The frame for the target was queued.
    Delivered,
    /// The target is not connected, or its queue refused the frame.
    Dropped,
    /// The sender is not registered on this connection; nothing happened.
    UnknownSender,
}

impl From<Delivery> for Routed {
    fn from(delivery: Delivery) -> Self {
        match delivery {
            Delivery::Queued => Self::Delivered,
            Delivery::Offline | Delivery::Congested => Self::Dropped,
        }
    }
}

impl Registry {
    /// Applies one signaling message from `sender`, received on `conn`.
    ///
    /// | kind | effect |
    /// |---|---|
    /// | `call_user` | sender and target become busy; target gets `incoming_call` |
    /// | `call_accepted` | target gets `call_accepted` |
    /// | `offer` `answer` `candidate` | `from` stamped, forwarded to target |
    /// | `hangup` `call_declined` | target gets `call_ended`; both become available |
    ///
    /// The whole transition happens under the registry lock, so two peers
    /// hanging up on each other at once cannot interleave. Delivery is best
    /// effort: a missing target is dropped silently. A connection that has
    /// been replaced no longer speaks for `sender`.
    pub fn route(&self, sender: ParticipantId, conn: ConnId, msg: ClientMessage) -> Routed {
        let target = msg.target();
        let kind = msg.kind();

        let routed = self.with_members(|members| {
            if !members.is_served_by(sender, conn) {
                return Routed::UnknownSender;
            }

            match msg {
                ClientMessage::CallUser(_) => {
                    // Nobody to ring: leave the caller's status alone.
                    if !members.contains(target) {
                        return Routed::Dropped;
                    }
                    members.set_status(sender, Status::Busy);
                    members.set_status(target, Status::Busy);
                    let Some(from_user) = members.participant(sender).cloned() else {
                        return Routed::UnknownSender;
                    };
                    info!(caller = %sender, callee = %target, "call started");
                    let incoming = ServerMessage::IncomingCall(IncomingCall {
                        from: sender,
                        from_user,
                    });
                    members.send_to(target, &incoming).into()
                }
                ClientMessage::CallAccepted(_) => {
                    info!(callee = %sender, caller = %target, "call accepted");
                    members
                        .send_to(target, &ServerMessage::CallAccepted(Origin { from: sender }))
                        .into()
                }
                ClientMessage::Offer(mut signal) => {
                    signal.stamp(sender);
                    members.send_to(target, &ServerMessage::Offer(signal)).into()
                }
                ClientMessage::Answer(mut signal) => {
                    signal.stamp(sender);
                    members.send_to(target, &ServerMessage::Answer(signal)).into()
                }
                ClientMessage::Candidate(mut signal) => {
                    signal.stamp(sender);
                    members
                        .send_to(target, &ServerMessage::Candidate(signal))
                        .into()
                }
                ClientMessage::Hangup(_) | ClientMessage::CallDeclined(_) => {
                    info!(from = %sender, to = %target, kind, "call ended");
                    let routed: Routed = members.send_to(target, &ServerMessage::CallEnded).into();
                    members.set_status(sender, Status::Available);
                    members.set_status(target, Status::Available);
                    routed
                }
            }
        });

        if routed != Routed::Delivered {
            debug!(from = %sender, to = %target, kind, outcome = ?routed, "message not delivered");
        }
        routed
    }
}
