//! Core type definitions and protocol constants for parley.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Path prefix of the signaling endpoint. The credential follows it:
/// `/ws/{init_data}`.
pub const WS_PATH_PREFIX: &str = "/ws/";

/// Platform-assigned numeric identity of a participant.
///
/// Stable across reconnects of the same account, so it doubles as the
/// registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub i64);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<i64> for ParticipantId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Call availability of a connected participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Not in a call; can be called.
    #[default]
    Available,
    /// Ringing or in a call.
    Busy,
}

/// Display metadata supplied by the identity platform.
///
/// Only `id` is interpreted. Everything else (`first_name`, `username`,
/// `photo_url`, ...) is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Platform identity.
    pub id: ParticipantId,
    /// Remaining profile fields, verbatim.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Profile {
    /// Creates a profile with no display fields.
    #[must_use]
    pub fn new(id: impl Into<ParticipantId>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Adds a display field, builder style.
    #[must_use]
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_owned(), value.into());
        self
    }
}

/// One roster entry: the profile with the relay-managed `status` merged in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    /// Identity and display metadata.
    #[serde(flatten)]
    pub profile: Profile,
    /// Current availability.
    pub status: Status,
}

impl Participant {
    /// Wraps a freshly verified profile. New participants start available.
    ///
    /// A client-controlled `status` key inside the profile is dropped so the
    /// serialized record carries exactly one, relay-owned, status.
    #[must_use]
    pub fn new(mut profile: Profile) -> Self {
        profile.fields.remove("status");
        Self {
            profile,
            status: Status::Available,
        }
    }

    /// Shorthand for `self.profile.id`.
    #[must_use]
    pub const fn id(&self) -> ParticipantId {
        self.profile.id
    }
}
