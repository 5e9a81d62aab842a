//! Construction of domain values from raw bytes.
//!
//! The factory is the only place format assumptions live; the engines treat
//! everything it returns as opaque. Implementations that encode ids
//! differently (longer ids, non-hex wire forms) swap in here without
//! touching the engines.

use chrono::{DateTime, Utc};

use crate::error::GregorError;
use crate::message::{
    Dismissal, InBandMessage, Item, Metadata, MsgRange, State, StateSync, StateUpdate,
};
use crate::types::{Body, Category, DeviceId, InBandMsgType, MsgId, TimeOrOffset, Uid};

pub trait ObjFactory {
    fn make_uid(&self, bytes: &[u8]) -> Result<Uid, GregorError>;
    fn make_msg_id(&self, bytes: &[u8]) -> Result<MsgId, GregorError>;
    fn make_device_id(&self, bytes: &[u8]) -> Result<DeviceId, GregorError>;
    fn make_category(&self, s: &str) -> Result<Category, GregorError>;
    fn make_body(&self, bytes: &[u8]) -> Result<Body, GregorError>;

    fn make_metadata(
        &self,
        uid: Uid,
        msg_id: MsgId,
        device_id: Option<DeviceId>,
        ctime: Option<DateTime<Utc>>,
        msg_type: InBandMsgType,
    ) -> Result<Metadata, GregorError>;

    #[allow(clippy::too_many_arguments)]
    fn make_item(
        &self,
        uid: Uid,
        msg_id: MsgId,
        device_id: Option<DeviceId>,
        ctime: DateTime<Utc>,
        category: Category,
        dtime: Option<DateTime<Utc>>,
        body: Body,
    ) -> Result<Item, GregorError>;

    fn make_state(&self, items: Vec<Item>) -> Result<State, GregorError>;

    fn make_in_band_message_from_item(&self, item: Item) -> Result<InBandMessage, GregorError>;

    fn make_dismissal_by_id(
        &self,
        uid: Uid,
        msg_id: MsgId,
        device_id: Option<DeviceId>,
        ctime: DateTime<Utc>,
        dmsg_id: MsgId,
    ) -> Result<InBandMessage, GregorError>;

    #[allow(clippy::too_many_arguments)]
    fn make_dismissal_by_range(
        &self,
        uid: Uid,
        msg_id: MsgId,
        device_id: Option<DeviceId>,
        ctime: DateTime<Utc>,
        category: Category,
        end_time: DateTime<Utc>,
    ) -> Result<InBandMessage, GregorError>;

    fn make_state_sync_message(
        &self,
        uid: Uid,
        msg_id: MsgId,
        device_id: Option<DeviceId>,
        ctime: DateTime<Utc>,
    ) -> Result<InBandMessage, GregorError>;
}

/// Raw width of every id this factory accepts: 8 bytes, 16 hex chars in
/// storage.
pub const RAW_ID_LEN: usize = 8;

/// Stock factory: fixed-width ids, hex storage spelling, non-empty
/// categories.
#[derive(Debug, Clone, Copy, Default)]
pub struct HexFactory;

impl HexFactory {
    fn check_len(field: &'static str, bytes: &[u8]) -> Result<(), GregorError> {
        if bytes.len() != RAW_ID_LEN {
            return Err(GregorError::BadIdLength {
                field,
                expected: RAW_ID_LEN,
                got: bytes.len(),
            });
        }
        Ok(())
    }
}

impl ObjFactory for HexFactory {
    fn make_uid(&self, bytes: &[u8]) -> Result<Uid, GregorError> {
        Self::check_len("uid", bytes)?;
        Ok(Uid(bytes.to_vec()))
    }

    fn make_msg_id(&self, bytes: &[u8]) -> Result<MsgId, GregorError> {
        Self::check_len("msgid", bytes)?;
        Ok(MsgId(bytes.to_vec()))
    }

    fn make_device_id(&self, bytes: &[u8]) -> Result<DeviceId, GregorError> {
        Self::check_len("devid", bytes)?;
        Ok(DeviceId(bytes.to_vec()))
    }

    fn make_category(&self, s: &str) -> Result<Category, GregorError> {
        if s.is_empty() {
            return Err(GregorError::EmptyCategory);
        }
        Ok(Category(s.to_string()))
    }

    fn make_body(&self, bytes: &[u8]) -> Result<Body, GregorError> {
        Ok(Body(bytes.to_vec()))
    }

    fn make_metadata(
        &self,
        uid: Uid,
        msg_id: MsgId,
        device_id: Option<DeviceId>,
        ctime: Option<DateTime<Utc>>,
        msg_type: InBandMsgType,
    ) -> Result<Metadata, GregorError> {
        Ok(Metadata {
            uid,
            msg_id,
            ctime,
            device_id,
            msg_type,
        })
    }

    fn make_item(
        &self,
        uid: Uid,
        msg_id: MsgId,
        device_id: Option<DeviceId>,
        ctime: DateTime<Utc>,
        category: Category,
        dtime: Option<DateTime<Utc>>,
        body: Body,
    ) -> Result<Item, GregorError> {
        let metadata = self.make_metadata(
            uid,
            msg_id,
            device_id,
            Some(ctime),
            InBandMsgType::Update,
        )?;
        Ok(Item {
            metadata,
            category,
            dtime: dtime.map(TimeOrOffset::At),
            notify_times: vec![],
            body,
        })
    }

    fn make_state(&self, items: Vec<Item>) -> Result<State, GregorError> {
        Ok(State::new(items))
    }

    fn make_in_band_message_from_item(&self, item: Item) -> Result<InBandMessage, GregorError> {
        let metadata = item.metadata.clone();
        Ok(InBandMessage::Update(StateUpdate {
            metadata,
            creation: Some(item),
            dismissal: None,
        }))
    }

    fn make_dismissal_by_id(
        &self,
        uid: Uid,
        msg_id: MsgId,
        device_id: Option<DeviceId>,
        ctime: DateTime<Utc>,
        dmsg_id: MsgId,
    ) -> Result<InBandMessage, GregorError> {
        let metadata =
            self.make_metadata(uid, msg_id, device_id, Some(ctime), InBandMsgType::Update)?;
        Ok(InBandMessage::Update(StateUpdate {
            metadata,
            creation: None,
            dismissal: Some(Dismissal {
                msg_ids: vec![dmsg_id],
                ranges: vec![],
            }),
        }))
    }

    fn make_dismissal_by_range(
        &self,
        uid: Uid,
        msg_id: MsgId,
        device_id: Option<DeviceId>,
        ctime: DateTime<Utc>,
        category: Category,
        end_time: DateTime<Utc>,
    ) -> Result<InBandMessage, GregorError> {
        let metadata =
            self.make_metadata(uid, msg_id, device_id, Some(ctime), InBandMsgType::Update)?;
        Ok(InBandMessage::Update(StateUpdate {
            metadata,
            creation: None,
            dismissal: Some(Dismissal {
                msg_ids: vec![],
                ranges: vec![MsgRange {
                    category,
                    end_time: TimeOrOffset::At(end_time),
                }],
            }),
        }))
    }

    fn make_state_sync_message(
        &self,
        uid: Uid,
        msg_id: MsgId,
        device_id: Option<DeviceId>,
        ctime: DateTime<Utc>,
    ) -> Result<InBandMessage, GregorError> {
        let metadata =
            self.make_metadata(uid, msg_id, device_id, Some(ctime), InBandMsgType::Sync)?;
        Ok(InBandMessage::Sync(StateSync { metadata }))
    }
}
