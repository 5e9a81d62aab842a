//! In-memory state machine.
//!
//! Keeps the same observable semantics as the relational engine (same
//! visibility predicates, same replay merging) without a database, which
//! makes it the reference implementation the conformance suite checks the
//! SQL engine against.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::error::GregorError;
use crate::machine::StateMachine;
use crate::message::{
    InBandMessage, Item, Message, Metadata, State, StateSync, StateUpdate,
};
use crate::types::{Body, Category, DeviceId, InBandMsgType, MsgId, TimeOrOffset, Uid};

struct MemItem {
    // Insertion sequence, the tie-break when ctimes collide.
    seq: usize,
    ctime: DateTime<Utc>,
    device_id: Option<DeviceId>,
    category: Category,
    body: Body,
    dtime: Option<DateTime<Utc>>,
    notify_times: Vec<DateTime<Utc>>,
}

struct LogEntry {
    ctime: DateTime<Utc>,
    msg: InBandMessage,
}

#[derive(Default)]
struct UserLog {
    seen: HashSet<MsgId>,
    items: HashMap<MsgId, MemItem>,
    log: Vec<LogEntry>,
}

pub struct MemEngine {
    clock: Arc<dyn Clock>,
    users: HashMap<Uid, UserLog>,
}

impl MemEngine {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        MemEngine {
            clock,
            users: HashMap::new(),
        }
    }

    fn validate(md: &Metadata) -> Result<(), GregorError> {
        if md.uid.bytes().is_empty() {
            return Err(GregorError::EmptyUid);
        }
        if md.msg_id.bytes().is_empty() {
            return Err(GregorError::EmptyMsgId);
        }
        if !matches!(md.msg_type, InBandMsgType::Update | InBandMsgType::Sync) {
            return Err(GregorError::UnrecognizedMsgType(md.msg_type.code()));
        }
        Ok(())
    }

    fn apply_update(user: &mut UserLog, u: &StateUpdate, ctime: DateTime<Utc>, now: DateTime<Utc>) {
        if let Some(item) = &u.creation {
            user.items.insert(
                u.metadata.msg_id.clone(),
                MemItem {
                    seq: user.log.len(),
                    ctime,
                    device_id: u.metadata.device_id.clone(),
                    category: item.category.clone(),
                    body: item.body.clone(),
                    dtime: item.dtime_at(now),
                    notify_times: item.notify_times.iter().map(|t| t.resolve(now)).collect(),
                },
            );
        }
        if let Some(dismissal) = &u.dismissal {
            for dmid in &dismissal.msg_ids {
                if let Some(target) = user.items.get_mut(dmid) {
                    target.dtime = Some(ctime);
                }
            }
            for range in &dismissal.ranges {
                let end = range.end_time.resolve(now);
                for target in user.items.values_mut() {
                    if target.category == range.category && target.ctime <= end {
                        target.dtime = Some(ctime);
                    }
                }
            }
        }
    }

    fn item_from_mem(uid: &Uid, msg_id: &MsgId, it: &MemItem) -> Item {
        Item {
            metadata: Metadata {
                uid: uid.clone(),
                msg_id: msg_id.clone(),
                ctime: Some(it.ctime),
                device_id: it.device_id.clone(),
                msg_type: InBandMsgType::Update,
            },
            category: it.category.clone(),
            dtime: it.dtime.map(TimeOrOffset::At),
            notify_times: it.notify_times.iter().copied().map(TimeOrOffset::At).collect(),
            body: it.body.clone(),
        }
    }

    fn device_visible(stored: Option<&DeviceId>, queried: Option<&DeviceId>) -> bool {
        match queried {
            // A null query device means the global state: everything.
            None => true,
            // A stored null device means broadcast to all devices.
            Some(d) => stored.is_none() || stored == Some(d),
        }
    }
}

impl StateMachine for MemEngine {
    type Error = GregorError;

    fn consume_message(&mut self, m: &mut Message) -> Result<(), Self::Error> {
        let Some(ibm) = m.in_band_mut() else {
            return Ok(());
        };
        Self::validate(ibm.metadata())?;

        let now = self.clock.now();
        let md = ibm.metadata_mut();
        let uid = md.uid.clone();
        let msg_id = md.msg_id.clone();
        let user = self.users.entry(uid.clone()).or_default();
        if user.seen.contains(&msg_id) {
            return Err(GregorError::DuplicateMsgId {
                uid: uid.to_hex(),
                msgid: msg_id.to_hex(),
            });
        }
        let ctime = match md.ctime {
            Some(t) => t,
            None => {
                md.ctime = Some(now);
                now
            }
        };

        if let InBandMessage::Update(u) = &*ibm {
            Self::apply_update(user, u, ctime, now);
        }

        // Log a normalized copy: range end times resolve at ingest, the way
        // the relational engine persists them.
        let mut logged = ibm.clone();
        if let InBandMessage::Update(u) = &mut logged {
            if let Some(dismissal) = &mut u.dismissal {
                for range in &mut dismissal.ranges {
                    range.end_time = TimeOrOffset::At(range.end_time.resolve(now));
                }
            }
        }
        user.seen.insert(msg_id);
        user.log.push(LogEntry { ctime, msg: logged });
        Ok(())
    }

    fn state(
        &self,
        u: &Uid,
        d: Option<&DeviceId>,
        t: Option<&TimeOrOffset>,
    ) -> Result<State, Self::Error> {
        let now = self.clock.now();
        let query_time = t.map(|too| too.resolve(now)).unwrap_or(now);
        let Some(user) = self.users.get(u) else {
            return Ok(State::default());
        };

        let mut visible: Vec<(&MsgId, &MemItem)> = user
            .items
            .iter()
            .filter(|(_, it)| it.dtime.map_or(true, |dt| dt > query_time))
            .filter(|(_, it)| Self::device_visible(it.device_id.as_ref(), d))
            .filter(|(_, it)| t.is_none() || it.ctime <= query_time)
            .collect();
        visible.sort_by_key(|(_, it)| (it.ctime, it.seq));

        Ok(State::new(
            visible
                .into_iter()
                .map(|(mid, it)| Self::item_from_mem(u, mid, it))
                .collect(),
        ))
    }

    fn in_band_messages_since(
        &self,
        u: &Uid,
        d: Option<&DeviceId>,
        t: &TimeOrOffset,
    ) -> Result<Vec<InBandMessage>, Self::Error> {
        let now = self.clock.now();
        let since = t.resolve(now);
        let Some(user) = self.users.get(u) else {
            return Ok(vec![]);
        };

        let mut entries: Vec<&LogEntry> = user.log.iter().collect();
        entries.sort_by_key(|e| e.ctime);

        let mut ret = Vec::new();
        for entry in entries {
            if entry.ctime < since {
                continue;
            }
            let md = entry.msg.metadata();
            if !Self::device_visible(md.device_id.as_ref(), d) {
                continue;
            }
            match &entry.msg {
                InBandMessage::Update(upd) => {
                    // A creation that has since been dismissed drops out of
                    // the replay entirely, dismissal payload included.
                    if upd.creation.is_some() {
                        let dismissed = user
                            .items
                            .get(&md.msg_id)
                            .and_then(|it| it.dtime)
                            .map_or(false, |dt| dt <= now);
                        if dismissed {
                            continue;
                        }
                    }
                    let mut replay = upd.clone();
                    // Replayed creations come back without a dismissal time,
                    // matching what the relational engine reconstructs.
                    if let Some(item) = &mut replay.creation {
                        item.dtime = None;
                        item.notify_times.clear();
                    }
                    ret.push(InBandMessage::Update(replay));
                }
                InBandMessage::Sync(sync) => {
                    ret.push(InBandMessage::Sync(StateSync {
                        metadata: sync.metadata.clone(),
                    }));
                }
            }
        }
        Ok(ret)
    }
}
