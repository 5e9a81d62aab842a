//! NULL-aware column decoders.
//!
//! Every decoder returns `Option<T>`: a SQL NULL becomes `None`, never a
//! panic or a sentinel. The replay classifier branches on these options
//! instead of poking at raw driver values, and each decoded id goes through
//! the factory so format assumptions stay in one place.

use gregor_core::{Body, Category, DeviceId, InBandMsgType, MsgId, ObjFactory, Uid};
use rusqlite::Row;

use chrono::{DateTime, Utc};

use crate::dialect::time_from_micros;
use crate::error::{Result, StoreError};

pub fn uid_at<F: ObjFactory>(f: &F, row: &Row<'_>, idx: usize) -> Result<Option<Uid>> {
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(h) => Ok(Some(f.make_uid(&hex::decode(h)?)?)),
    }
}

pub fn msg_id_at<F: ObjFactory>(f: &F, row: &Row<'_>, idx: usize) -> Result<Option<MsgId>> {
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(h) => Ok(Some(f.make_msg_id(&hex::decode(h)?)?)),
    }
}

pub fn device_id_at<F: ObjFactory>(f: &F, row: &Row<'_>, idx: usize) -> Result<Option<DeviceId>> {
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(h) => Ok(Some(f.make_device_id(&hex::decode(h)?)?)),
    }
}

pub fn category_at<F: ObjFactory>(f: &F, row: &Row<'_>, idx: usize) -> Result<Option<Category>> {
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(s) => Ok(Some(f.make_category(&s)?)),
    }
}

pub fn body_at<F: ObjFactory>(f: &F, row: &Row<'_>, idx: usize) -> Result<Option<Body>> {
    match row.get::<_, Option<Vec<u8>>>(idx)? {
        None => Ok(None),
        Some(b) => Ok(Some(f.make_body(&b)?)),
    }
}

pub fn time_at(row: &Row<'_>, idx: usize) -> Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        None => Ok(None),
        Some(us) => time_from_micros(us)
            .map(Some)
            .ok_or(StoreError::InvalidTime(us)),
    }
}

pub fn msg_type_at(row: &Row<'_>, idx: usize) -> Result<Option<InBandMsgType>> {
    match row.get::<_, Option<i64>>(idx)? {
        None => Ok(None),
        Some(code) => {
            let code_u32 =
                u32::try_from(code).map_err(|_| invalid_msg_type(code))?;
            InBandMsgType::from_code(code_u32)
                .map(Some)
                .ok_or_else(|| invalid_msg_type(code))
        }
    }
}

fn invalid_msg_type(code: i64) -> StoreError {
    StoreError::Core(gregor_core::GregorError::UnrecognizedMsgType(
        u32::try_from(code).unwrap_or(u32::MAX),
    ))
}
