//! JSON signaling messages exchanged over the WebSocket.
//!
//! Every frame is a text message shaped `{"type": ..., "data": {...}}`.
//! Inbound kinds are a closed set ([`ClientMessage`]); anything that does not
//! decode into one of them is a [`ProtocolError`] and never reaches routing.

use crate::types::{Participant, ParticipantId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors produced while decoding or encoding signaling frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame was not valid JSON or did not match any known kind.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The frame was not a text frame.
    #[error("unsupported frame: expected text")]
    NotText,
}

/// Body of a call-lifecycle message: only the peer it is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Participant the message is for.
    pub target_id: ParticipantId,
}

/// Body of an `offer`, `answer` or `candidate` message.
///
/// The relay never looks inside `body` (SDP, ICE candidate, ...). It only
/// reads `target_id` and stamps `from`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Participant the message is for.
    pub target_id: ParticipantId,
    /// Opaque negotiation payload, forwarded verbatim.
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Signal {
    /// Records `sender` as the origin, overwriting any client-supplied `from`.
    pub fn stamp(&mut self, sender: ParticipantId) {
        self.body.insert("from".to_owned(), Value::from(sender.0));
    }

    /// The relay-assigned origin, if stamped.
    #[must_use]
    pub fn origin(&self) -> Option<ParticipantId> {
        self.body.get("from")?.as_i64().map(ParticipantId)
    }
}

/// Messages a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ring `target_id`.
    CallUser(Target),
    /// Accept a call from `target_id`.
    CallAccepted(Target),
    /// SDP offer.
    Offer(Signal),
    /// SDP answer.
    Answer(Signal),
    /// ICE candidate.
    Candidate(Signal),
    /// End an established call.
    Hangup(Target),
    /// Refuse an incoming call.
    CallDeclined(Target),
}

impl ClientMessage {
    /// Decodes a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] for invalid JSON, an unknown
    /// `type`, or a `data` object missing its required fields.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Wire name of this message's kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CallUser(_) => "call_user",
            Self::CallAccepted(_) => "call_accepted",
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::Candidate(_) => "candidate",
            Self::Hangup(_) => "hangup",
            Self::CallDeclined(_) => "call_declined",
        }
    }

    /// Participant this message is addressed to.
    #[must_use]
    pub const fn target(&self) -> ParticipantId {
        match self {
            Self::CallUser(t) | Self::CallAccepted(t) | Self::Hangup(t) | Self::CallDeclined(t) => {
                t.target_id
            }
            Self::Offer(s) | Self::Answer(s) | Self::Candidate(s) => s.target_id,
        }
    }

    /// Encodes to a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] if serialization fails.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Payload of `incoming_call`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingCall {
    /// Caller id.
    pub from: ParticipantId,
    /// Caller's roster record at the time of the call.
    pub from_user: Participant,
}

/// Payload of a relayed `call_accepted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    /// Participant that sent the original message.
    pub from: ParticipantId,
}

/// Messages the relay emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full roster, in registration order.
    UserList(Vec<Participant>),
    /// Someone is calling the recipient.
    IncomingCall(IncomingCall),
    /// The callee picked up.
    CallAccepted(Origin),
    /// Relayed SDP offer, `from` stamped.
    Offer(Signal),
    /// Relayed SDP answer, `from` stamped.
    Answer(Signal),
    /// Relayed ICE candidate, `from` stamped.
    Candidate(Signal),
    /// The peer hung up or declined. Carries no `data`.
    CallEnded,
}

impl ServerMessage {
    /// Wire name of this message's type.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UserList(_) => "user_list",
            Self::IncomingCall(_) => "incoming_call",
            Self::CallAccepted(_) => "call_accepted",
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::Candidate(_) => "candidate",
            Self::CallEnded => "call_ended",
        }
    }

    /// Encodes to a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] if serialization fails.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a text frame. Used by clients and tests.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] if the text is not a known message.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn relayed_from_is_always_the_sender(
            sender in any::<i64>(),
            spoofed in any::<i64>(),
            target in any::<i64>(),
        ) {
            let text = format!(
                r#"{{"type":"offer","data":{{"target_id":{target},"from":{spoofed},"sdp":"v=0"}}}}"#
            );
            let ClientMessage::Offer(mut signal) = ClientMessage::parse(&text).unwrap() else {
                panic!("expected offer");
            };
            signal.stamp(ParticipantId(sender));
            let out = ServerMessage::Offer(signal).encode().unwrap();
            let ServerMessage::Offer(relayed) = ServerMessage::parse(&out).unwrap() else {
                panic!("expected offer");
            };
            prop_assert_eq!(relayed.origin(), Some(ParticipantId(sender)));
            prop_assert_eq!(relayed.target_id, ParticipantId(target));
        }
    }
}
