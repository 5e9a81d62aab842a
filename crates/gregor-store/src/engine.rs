//! The relational state-machine engine.
//!
//! `consume_message` applies one in-band message inside a single
//! transaction; `state` and `in_band_messages_since` each build one query
//! the database evaluates against the live schema, so no per-timestamp
//! views are ever materialized. Historical snapshots fall out of the three
//! time columns (ctime, dtime, query time) interacting in the WHERE clause.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Row, Transaction};

use gregor_core::{
    Clock, DeviceId, GregorError, InBandMessage, InBandMsgType, Item, Message, Metadata, MsgId,
    MsgRange, ObjFactory, State, StateMachine, StateSync, StateUpdate, TimeOrOffset, Uid,
};

use crate::builder::QueryBuilder;
use crate::database::Database;
use crate::dialect::{time_from_micros, TimeDialect};
use crate::error::{Result, StoreError};
use crate::scanners;

pub struct SqlEngine<F> {
    db: Database,
    factory: F,
    dialect: Box<dyn TimeDialect>,
    clock: Arc<dyn Clock>,
}

fn check_metadata_for_insert(md: &Metadata) -> std::result::Result<(), GregorError> {
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

fn hex_or_null(d: Option<&DeviceId>) -> Value {
    match d {
        Some(d) => Value::from(d.to_hex()),
        None => Value::Null,
    }
}

impl<F: ObjFactory> SqlEngine<F> {
    pub fn new(
        db: Database,
        factory: F,
        dialect: Box<dyn TimeDialect>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        SqlEngine {
            db,
            factory,
            dialect,
            clock,
        }
    }

    fn builder(&self) -> QueryBuilder<'_> {
        QueryBuilder::new(self.dialect.as_ref(), self.clock.as_ref())
    }

    #[cfg(test)]
    pub(crate) fn database(&self) -> &Database {
        &self.db
    }

    fn ctime_from_message(
        &self,
        tx: &Transaction<'_>,
        uid: &Uid,
        msg_id: &MsgId,
    ) -> Result<DateTime<Utc>> {
        let us: i64 = tx.query_row(
            "SELECT ctime FROM messages WHERE uid=? AND msgid=?",
            rusqlite::params![uid.to_hex(), msg_id.to_hex()],
            |row| row.get(0),
        )?;
        time_from_micros(us).ok_or(StoreError::InvalidTime(us))
    }

    /// Insert the messages row. Returns the message's concrete ctime; when
    /// the caller left it unset, the assigned instant is read back from the
    /// store and reflected into `md`.
    fn consume_in_band_message_metadata(
        &self,
        tx: &Transaction<'_>,
        md: &mut Metadata,
        t: InBandMsgType,
    ) -> Result<DateTime<Utc>> {
        check_metadata_for_insert(md)?;
        let mut qb = self.builder();
        qb.push(
            "INSERT INTO messages(uid, msgid, mtype, devid, ctime) VALUES(?, ?, ?, ?,",
            vec![
                Value::from(md.uid.to_hex()),
                Value::from(md.msg_id.to_hex()),
                Value::from(i64::from(t.code())),
                hex_or_null(md.device_id.as_ref()),
            ],
        );
        match md.ctime {
            Some(at) => qb.push_time(at),
            None => qb.now(),
        }
        qb.push(")", vec![]);
        qb.exec(tx)?;

        match md.ctime {
            Some(at) => Ok(at),
            None => {
                let assigned = self.ctime_from_message(tx, &md.uid, &md.msg_id)?;
                md.ctime = Some(assigned);
                Ok(assigned)
            }
        }
    }

    fn consume_creation(&self, tx: &Transaction<'_>, md: &Metadata, item: &Item) -> Result<()> {
        let mut qb = self.builder();
        qb.push(
            "INSERT INTO items(uid, msgid, category, body, dtime) VALUES(?,?,?,?,",
            vec![
                Value::from(md.uid.to_hex()),
                Value::from(md.msg_id.to_hex()),
                Value::from(item.category.as_str().to_string()),
                Value::from(item.body.bytes().to_vec()),
            ],
        );
        match &item.dtime {
            Some(too) => qb.time_or_offset(too),
            None => qb.push("NULL", vec![]),
        }
        qb.push(")", vec![]);
        qb.exec(tx)?;

        for t in &item.notify_times {
            let mut nqb = self.builder();
            nqb.push(
                "INSERT INTO reminders(uid, msgid, ntime) VALUES(?,?,",
                vec![
                    Value::from(md.uid.to_hex()),
                    Value::from(md.msg_id.to_hex()),
                ],
            );
            nqb.time_or_offset(t);
            nqb.push(")", vec![]);
            nqb.exec(tx)?;
        }
        Ok(())
    }

    fn consume_msg_ids_to_dismiss(
        &self,
        tx: &Transaction<'_>,
        md: &Metadata,
        dmids: &[MsgId],
        ctime: DateTime<Utc>,
    ) -> Result<()> {
        let mut ins =
            tx.prepare("INSERT INTO dismissals_by_id(uid, msgid, dmsgid) VALUES(?, ?, ?)")?;
        let mut upd = tx.prepare("UPDATE items SET dtime=? WHERE uid=? AND msgid=?")?;

        let ctime_arg = self.dialect.bind_time(ctime);
        let uid_hex = md.uid.to_hex();
        let msgid_hex = md.msg_id.to_hex();

        for dmid in dmids {
            ins.execute(rusqlite::params![uid_hex, msgid_hex, dmid.to_hex()])?;
            upd.execute(rusqlite::params![ctime_arg, uid_hex, dmid.to_hex()])?;
        }
        Ok(())
    }

    fn consume_ranges_to_dismiss(
        &self,
        tx: &Transaction<'_>,
        md: &Metadata,
        ranges: &[MsgRange],
        ctime: DateTime<Utc>,
    ) -> Result<()> {
        for range in ranges {
            let mut qb = self.builder();
            qb.push(
                "INSERT INTO dismissals_by_time(uid, msgid, category, dtime) VALUES (?,?,?,",
                vec![
                    Value::from(md.uid.to_hex()),
                    Value::from(md.msg_id.to_hex()),
                    Value::from(range.category.as_str().to_string()),
                ],
            );
            qb.time_or_offset(&range.end_time);
            qb.push(")", vec![]);
            qb.exec(tx)?;

            // Affected items get the dismissing message's ctime, not the
            // range's end time: they vanish from now on, and historical
            // snapshots before now still include them.
            let mut qbu = self.builder();
            let ctime_arg = qbu.time_arg(ctime);
            qbu.push(
                "UPDATE items SET dtime=? WHERE uid=? AND category=? AND \
                 msgid IN (SELECT msgid FROM messages WHERE uid=? AND ctime<=",
                vec![
                    ctime_arg,
                    Value::from(md.uid.to_hex()),
                    Value::from(range.category.as_str().to_string()),
                    Value::from(md.uid.to_hex()),
                ],
            );
            qbu.time_or_offset(&range.end_time);
            qbu.push(")", vec![]);
            qbu.exec(tx)?;
        }
        Ok(())
    }

    fn consume_state_update(&self, update: &mut StateUpdate) -> Result<()> {
        tracing::debug!(
            uid = %update.metadata.uid,
            msgid = %update.metadata.msg_id,
            "consuming state update"
        );
        // Dropping an uncommitted transaction rolls it back, so any early
        // return below leaves the store untouched.
        let tx = self.db.conn().unchecked_transaction()?;

        let ctime =
            self.consume_in_band_message_metadata(&tx, &mut update.metadata, InBandMsgType::Update)?;
        if let Some(item) = &update.creation {
            self.consume_creation(&tx, &update.metadata, item)?;
        }
        if let Some(dismissal) = &update.dismissal {
            self.consume_msg_ids_to_dismiss(&tx, &update.metadata, &dismissal.msg_ids, ctime)?;
            self.consume_ranges_to_dismiss(&tx, &update.metadata, &dismissal.ranges, ctime)?;
        }

        tx.commit()?;
        Ok(())
    }

    fn consume_state_sync(&self, sync: &mut StateSync) -> Result<()> {
        tracing::debug!(
            uid = %sync.metadata.uid,
            msgid = %sync.metadata.msg_id,
            "consuming state sync"
        );
        let tx = self.db.conn().unchecked_transaction()?;
        self.consume_in_band_message_metadata(&tx, &mut sync.metadata, InBandMsgType::Sync)?;
        tx.commit()?;
        Ok(())
    }

    fn row_to_item(&self, u: &Uid, row: &Row<'_>) -> Result<Item> {
        let f = &self.factory;
        let msg_id = scanners::msg_id_at(f, row, 0)?.ok_or(StoreError::NullColumn("msgid"))?;
        let device_id = scanners::device_id_at(f, row, 1)?;
        let category =
            scanners::category_at(f, row, 2)?.ok_or(StoreError::NullColumn("category"))?;
        let dtime = scanners::time_at(row, 3)?;
        let body = match scanners::body_at(f, row, 4)? {
            Some(b) => b,
            None => f.make_body(&[])?,
        };
        let ctime = scanners::time_at(row, 5)?.ok_or(StoreError::NullColumn("ctime"))?;
        Ok(self
            .factory
            .make_item(u.clone(), msg_id, device_id, ctime, category, dtime, body)?)
    }

    fn items(
        &self,
        u: &Uid,
        d: Option<&DeviceId>,
        t: Option<&TimeOrOffset>,
    ) -> Result<Vec<Item>> {
        let mut qb = self.builder();
        qb.push(
            "SELECT i.msgid, m.devid, i.category, i.dtime, i.body, m.ctime \
             FROM items AS i \
             INNER JOIN messages AS m ON (i.uid=m.uid AND i.msgid=m.msgid) \
             WHERE i.uid=? AND (i.dtime IS NULL OR i.dtime >",
            vec![Value::from(u.to_hex())],
        );
        match t {
            Some(too) => qb.time_or_offset(too),
            None => qb.now(),
        }
        qb.push(")", vec![]);
        if let Some(d) = d {
            // A NULL devid row is intended for all devices of the user, so
            // a device-scoped query sees it too.
            qb.push(
                "AND (m.devid=? OR m.devid IS NULL)",
                vec![Value::from(d.to_hex())],
            );
        }
        if let Some(too) = t {
            qb.push("AND m.ctime <=", vec![]);
            qb.time_or_offset(too);
        }
        qb.push("ORDER BY m.ctime ASC", vec![]);

        let mut stmt = self.db.conn().prepare(&qb.sql())?;
        let mut rows = stmt.query(rusqlite::params_from_iter(qb.params().iter()))?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(self.row_to_item(u, row)?);
        }
        Ok(items)
    }

    fn row_to_metadata(&self, row: &Row<'_>) -> Result<Metadata> {
        let f = &self.factory;
        let uid = scanners::uid_at(f, row, 0)?.ok_or(StoreError::NullColumn("uid"))?;
        let msg_id = scanners::msg_id_at(f, row, 1)?.ok_or(StoreError::NullColumn("msgid"))?;
        let ctime = scanners::time_at(row, 2)?.ok_or(StoreError::NullColumn("ctime"))?;
        let device_id = scanners::device_id_at(f, row, 3)?;
        let msg_type =
            scanners::msg_type_at(row, 4)?.ok_or(StoreError::NullColumn("mtype"))?;
        Ok(self
            .factory
            .make_metadata(uid, msg_id, device_id, Some(ctime), msg_type)?)
    }

    /// The bare metadata log since `t`: every message envelope for the user
    /// in ctime order, without payload reconstruction. Cheaper than
    /// [`StateMachine::in_band_messages_since`] when only the envelopes are
    /// needed.
    pub fn in_band_metadata_since(
        &self,
        u: &Uid,
        t: Option<&TimeOrOffset>,
    ) -> Result<Vec<Metadata>> {
        let mut qb = self.builder();
        qb.push(
            "SELECT uid, msgid, ctime, devid, mtype FROM messages WHERE uid=?",
            vec![Value::from(u.to_hex())],
        );
        if let Some(too) = t {
            qb.push("AND ctime >=", vec![]);
            qb.time_or_offset(too);
        }
        qb.push("ORDER BY ctime ASC", vec![]);

        let mut stmt = self.db.conn().prepare(&qb.sql())?;
        let mut rows = stmt.query(rusqlite::params_from_iter(qb.params().iter()))?;
        let mut ret = Vec::new();
        while let Some(row) = rows.next()? {
            ret.push(self.row_to_metadata(row)?);
        }
        Ok(ret)
    }

    fn row_to_in_band_message(&self, u: &Uid, row: &Row<'_>) -> Result<Option<InBandMessage>> {
        let f = &self.factory;
        let msg_id = scanners::msg_id_at(f, row, 0)?.ok_or(StoreError::NullColumn("msgid"))?;
        let device_id = scanners::device_id_at(f, row, 1)?;
        let ctime = scanners::time_at(row, 2)?.ok_or(StoreError::NullColumn("ctime"))?;
        let mtype = scanners::msg_type_at(row, 3)?;
        let category = scanners::category_at(f, row, 4)?;
        let body = scanners::body_at(f, row, 5)?;
        let d_category = scanners::category_at(f, row, 6)?;
        let d_time = scanners::time_at(row, 7)?;
        let d_msg_id = scanners::msg_id_at(f, row, 8)?;

        if let Some(category) = category {
            let body = match body {
                Some(b) => b,
                None => f.make_body(&[])?,
            };
            let item = f.make_item(u.clone(), msg_id, device_id, ctime, category, None, body)?;
            return Ok(Some(f.make_in_band_message_from_item(item)?));
        }
        if let (Some(cat), Some(end)) = (d_category, d_time) {
            return Ok(Some(f.make_dismissal_by_range(
                u.clone(),
                msg_id,
                device_id,
                ctime,
                cat,
                end,
            )?));
        }
        if let Some(dmid) = d_msg_id {
            return Ok(Some(f.make_dismissal_by_id(
                u.clone(),
                msg_id,
                device_id,
                ctime,
                dmid,
            )?));
        }
        if mtype == Some(InBandMsgType::Sync) {
            return Ok(Some(f.make_state_sync_message(
                u.clone(),
                msg_id,
                device_id,
                ctime,
            )?));
        }
        Ok(None)
    }
}

impl<F: ObjFactory> StateMachine for SqlEngine<F> {
    type Error = StoreError;

    fn consume_message(&mut self, m: &mut Message) -> Result<()> {
        let Some(ibm) = m.in_band_mut() else {
            // Out-of-band traffic never touches the store.
            return Ok(());
        };
        match ibm {
            InBandMessage::Update(update) => self.consume_state_update(update),
            InBandMessage::Sync(sync) => self.consume_state_sync(sync),
        }
    }

    fn state(
        &self,
        u: &Uid,
        d: Option<&DeviceId>,
        t: Option<&TimeOrOffset>,
    ) -> Result<State> {
        let items = self.items(u, d, t)?;
        Ok(self.factory.make_state(items)?)
    }

    fn in_band_messages_since(
        &self,
        u: &Uid,
        d: Option<&DeviceId>,
        t: &TimeOrOffset,
    ) -> Result<Vec<InBandMessage>> {
        let mut qb = self.builder();
        qb.push(
            "SELECT m.msgid, m.devid, m.ctime, m.mtype, \
             i.category, i.body, dt.category, dt.dtime, di.dmsgid \
             FROM messages AS m \
             LEFT JOIN items AS i ON (m.uid=i.uid AND m.msgid=i.msgid) \
             LEFT JOIN dismissals_by_time AS dt ON (m.uid=dt.uid AND m.msgid=dt.msgid) \
             LEFT JOIN dismissals_by_id AS di ON (m.uid=di.uid AND m.msgid=di.msgid) \
             WHERE m.uid=? AND (i.dtime IS NULL OR i.dtime >",
            vec![Value::from(u.to_hex())],
        );
        qb.now();
        qb.push(")", vec![]);
        if let Some(d) = d {
            qb.push(
                "AND (m.devid=? OR m.devid IS NULL)",
                vec![Value::from(d.to_hex())],
            );
        }
        qb.push("AND m.ctime >=", vec![]);
        qb.time_or_offset(t);
        qb.push("ORDER BY m.ctime ASC", vec![]);

        let mut stmt = self.db.conn().prepare(&qb.sql())?;
        let mut rows = stmt.query(rusqlite::params_from_iter(qb.params().iter()))?;

        // One message can fan out to several rows; merge them back, keeping
        // first-seen order.
        let mut ret: Vec<InBandMessage> = Vec::new();
        let mut lookup: HashMap<String, usize> = HashMap::new();
        while let Some(row) = rows.next()? {
            let Some(ibm) = self.row_to_in_band_message(u, row)? else {
                continue;
            };
            let key = ibm.metadata().msg_id.to_hex();
            match lookup.get(&key).copied() {
                Some(idx) => ret[idx].merge(ibm)?,
                None => {
                    lookup.insert(key, ret.len());
                    ret.push(ibm);
                }
            }
        }
        Ok(ret)
    }
}
