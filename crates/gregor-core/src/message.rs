//! Message and state values flowing through the state machine.
//!
//! An in-band message either mutates a user's state (`StateUpdate`) or marks
//! a resync point (`StateSync`). Out-of-band messages are broadcast traffic
//! the state machine passes through untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GregorError;
use crate::types::{Body, Category, DeviceId, InBandMsgType, MsgId, System, TimeOrOffset, Uid};

/// Per-message envelope. `ctime: None` means "assign on ingest": the engine
/// stamps the store's current instant and writes it back here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub uid: Uid,
    pub msg_id: MsgId,
    pub ctime: Option<DateTime<Utc>>,
    pub device_id: Option<DeviceId>,
    pub msg_type: InBandMsgType,
}

/// A visible unit of state. `dtime: None` means the item never expires on
/// its own; a dismissal may still retire it later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub metadata: Metadata,
    pub category: Category,
    pub dtime: Option<TimeOrOffset>,
    pub notify_times: Vec<TimeOrOffset>,
    pub body: Body,
}

impl Item {
    /// The instant this item stops being visible, if one is set.
    pub fn dtime_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.dtime.as_ref().map(|t| t.resolve(now))
    }
}

/// Category-scoped dismissal: everything in `category` created at or before
/// `end_time` goes away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgRange {
    pub category: Category,
    pub end_time: TimeOrOffset,
}

/// The dismissal half of a state update. Both lists may be non-empty at
/// once, and merged dismissals concatenate rather than deduplicate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dismissal {
    pub msg_ids: Vec<MsgId>,
    pub ranges: Vec<MsgRange>,
}

/// A state mutation: at most one creation, any number of dismissals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub metadata: Metadata,
    pub creation: Option<Item>,
    pub dismissal: Option<Dismissal>,
}

/// A rebaseline marker. Carries no mutation; only its metadata persists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSync {
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InBandMessage {
    Update(StateUpdate),
    Sync(StateSync),
}

impl InBandMessage {
    pub fn metadata(&self) -> &Metadata {
        match self {
            InBandMessage::Update(u) => &u.metadata,
            InBandMessage::Sync(s) => &s.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        match self {
            InBandMessage::Update(u) => &mut u.metadata,
            InBandMessage::Sync(s) => &mut s.metadata,
        }
    }

    pub fn as_update(&self) -> Option<&StateUpdate> {
        match self {
            InBandMessage::Update(u) => Some(u),
            InBandMessage::Sync(_) => None,
        }
    }

    pub fn as_sync(&self) -> Option<&StateSync> {
        match self {
            InBandMessage::Sync(s) => Some(s),
            InBandMessage::Update(_) => None,
        }
    }

    /// Fold another message with the same msgid into this one.
    ///
    /// Sync messages never merge. Two creations are a conflict; otherwise
    /// the present creation wins and dismissal lists concatenate.
    pub fn merge(&mut self, other: InBandMessage) -> Result<(), GregorError> {
        let (mine, theirs) = match (self, other) {
            (InBandMessage::Update(mine), InBandMessage::Update(theirs)) => (mine, theirs),
            _ => return Err(GregorError::SyncMergeConflict),
        };
        if mine.creation.is_some() && theirs.creation.is_some() {
            return Err(GregorError::CreationClash {
                msgid: mine.metadata.msg_id.to_hex(),
            });
        }
        if mine.creation.is_none() {
            mine.creation = theirs.creation;
        }
        match (&mut mine.dismissal, theirs.dismissal) {
            (Some(d), Some(d2)) => {
                d.msg_ids.extend(d2.msg_ids);
                d.ranges.extend(d2.ranges);
            }
            (slot @ None, d2) => *slot = d2,
            (Some(_), None) => {}
        }
        Ok(())
    }
}

/// Broadcast-only traffic; the state machine ignores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutOfBandMessage {
    pub system: System,
    pub uid: Uid,
    pub body: Body,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    InBand(InBandMessage),
    OutOfBand(OutOfBandMessage),
}

impl Message {
    pub fn in_band(&self) -> Option<&InBandMessage> {
        match self {
            Message::InBand(m) => Some(m),
            Message::OutOfBand(_) => None,
        }
    }

    pub fn in_band_mut(&mut self) -> Option<&mut InBandMessage> {
        match self {
            Message::InBand(m) => Some(m),
            Message::OutOfBand(_) => None,
        }
    }

    /// The user this message belongs to, whichever flavor it is.
    pub fn uid(&self) -> &Uid {
        match self {
            Message::InBand(m) => &m.metadata().uid,
            Message::OutOfBand(m) => &m.uid,
        }
    }
}

/// The items visible to a user (and optionally a device) at some instant,
/// in ctime order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    items: Vec<Item>,
}

impl State {
    pub fn new(items: Vec<Item>) -> Self {
        State { items }
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn items_in_category(&self, c: &Category) -> Vec<&Item> {
        self.items.iter().filter(|i| &i.category == c).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn md(msgid: &[u8]) -> Metadata {
        Metadata {
            uid: Uid(vec![1; 8]),
            msg_id: MsgId(msgid.to_vec()),
            ctime: None,
            device_id: None,
            msg_type: InBandMsgType::Update,
        }
    }

    fn item(msgid: &[u8], cat: &str, body: &str) -> Item {
        Item {
            metadata: md(msgid),
            category: Category(cat.into()),
            dtime: None,
            notify_times: vec![],
            body: Body(body.as_bytes().to_vec()),
        }
    }

    fn update(msgid: &[u8], creation: Option<Item>, dismissal: Option<Dismissal>) -> InBandMessage {
        InBandMessage::Update(StateUpdate {
            metadata: md(msgid),
            creation,
            dismissal,
        })
    }

    #[test]
    fn merge_concatenates_dismissals() {
        let mut a = update(
            b"m1",
            None,
            Some(Dismissal {
                msg_ids: vec![MsgId(b"x1".to_vec())],
                ranges: vec![],
            }),
        );
        let b = update(
            b"m1",
            None,
            Some(Dismissal {
                msg_ids: vec![MsgId(b"x2".to_vec()), MsgId(b"x2".to_vec())],
                ranges: vec![MsgRange {
                    category: Category("foos".into()),
                    end_time: TimeOrOffset::Unspecified,
                }],
            }),
        );
        a.merge(b).unwrap();
        let u = a.as_update().unwrap();
        let d = u.dismissal.as_ref().unwrap();
        // Duplicates survive: lists concatenate, no dedup.
        assert_eq!(d.msg_ids.len(), 3);
        assert_eq!(d.ranges.len(), 1);
    }

    #[test]
    fn merge_adopts_missing_creation() {
        let mut a = update(b"m1", None, None);
        let b = update(b"m1", Some(item(b"m1", "foos", "f1")), None);
        a.merge(b).unwrap();
        assert!(a.as_update().unwrap().creation.is_some());
    }

    #[test]
    fn merge_rejects_two_creations() {
        let mut a = update(b"m1", Some(item(b"m1", "foos", "f1")), None);
        let b = update(b"m1", Some(item(b"m1", "foos", "f2")), None);
        let err = a.merge(b).unwrap_err();
        assert!(matches!(err, GregorError::CreationClash { .. }));
    }

    #[test]
    fn merge_rejects_sync() {
        let mut a = update(b"m1", None, None);
        let b = InBandMessage::Sync(StateSync { metadata: md(b"m1") });
        assert!(matches!(a.merge(b), Err(GregorError::SyncMergeConflict)));

        let mut s = InBandMessage::Sync(StateSync { metadata: md(b"m1") });
        let c = update(b"m1", None, None);
        assert!(matches!(s.merge(c), Err(GregorError::SyncMergeConflict)));
    }

    #[test]
    fn items_in_category_filters() {
        let state = State::new(vec![
            item(b"m1", "foos", "f1"),
            item(b"m2", "bars", "b1"),
            item(b"m3", "foos", "f2"),
        ]);
        let foos = state.items_in_category(&Category("foos".into()));
        assert_eq!(foos.len(), 2);
        assert_eq!(foos[1].body.bytes(), b"f2");
        assert!(state.items_in_category(&Category("none".into())).is_empty());
    }
}
