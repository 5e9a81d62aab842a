use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// User identity: opaque bytes, hex-encoded wherever a string spelling is
// needed. Width is enforced by the factory, not here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Uid(pub Vec<u8>);

impl Uid {
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl std::fmt::Display for Uid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Message identity, unique per (uid, msgid).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MsgId(pub Vec<u8>);

impl MsgId {
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl std::fmt::Display for MsgId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Device identity. A message stored without a device id is addressed to
/// every device of its user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub Vec<u8>);

impl DeviceId {
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Items partition within a user by category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Category(pub String);

impl Category {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque payload; storage is transparent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Body(pub Vec<u8>);

impl Body {
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Routing key for out-of-band messages. The state machine never interprets
/// it; it rides along for the broadcast layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct System(pub String);

impl std::fmt::Display for System {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A point in time expressed absolutely, relative to "now", or not at all.
///
/// `Unspecified` resolves to "now" on the query path; the write path treats
/// an absent dismissal time as SQL NULL instead (see `Item::dtime`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeOrOffset {
    At(DateTime<Utc>),
    OffsetMs(i64),
    Unspecified,
}

impl TimeOrOffset {
    pub fn at(t: DateTime<Utc>) -> Self {
        TimeOrOffset::At(t)
    }

    pub fn offset(d: Duration) -> Self {
        TimeOrOffset::OffsetMs(d.num_milliseconds())
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        match self {
            TimeOrOffset::At(t) => Some(*t),
            _ => None,
        }
    }

    pub fn is_unspecified(&self) -> bool {
        matches!(self, TimeOrOffset::Unspecified)
    }

    /// Collapse to an absolute instant relative to the supplied "now".
    pub fn resolve(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            TimeOrOffset::At(t) => *t,
            TimeOrOffset::OffsetMs(ms) => now + Duration::milliseconds(*ms),
            TimeOrOffset::Unspecified => now,
        }
    }
}

/// Discriminant persisted in the `mtype` column. `None` is the reserved
/// zero value and never reaches the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InBandMsgType {
    None,
    Update,
    Sync,
}

impl InBandMsgType {
    pub fn code(self) -> u32 {
        match self {
            InBandMsgType::None => 0,
            InBandMsgType::Update => 1,
            InBandMsgType::Sync => 2,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(InBandMsgType::None),
            1 => Some(InBandMsgType::Update),
            2 => Some(InBandMsgType::Sync),
            _ => None,
        }
    }
}
