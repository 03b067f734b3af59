//! Types and codecs shared by the parley relay and its clients.
//!
//! This crate provides:
//! - Participant and roster types ([`types`])
//! - JSON signaling message codec ([`message`])
//! - Telegram Web App credential verification ([`init_data`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod init_data;
pub mod message;
pub mod types;

pub use init_data::{AuthError, InitDataVerifier};
pub use message::{ClientMessage, ProtocolError, ServerMessage};
pub use types::{Participant, ParticipantId, Profile, Status};
