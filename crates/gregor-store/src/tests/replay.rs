//! Historical message-log queries and join fan-out merging.

use chrono::Duration;

use gregor_core::{Clock, FakeClock, InBandMessage, StateMachine, TimeOrOffset};

use super::harness::*;
use crate::error::StoreError;

fn expect_update(msg: &InBandMessage) -> &gregor_core::StateUpdate {
    msg.as_update().expect("expected a state update")
}

/// A dismissal naming several msgids fans out to one physical row per
/// target; the replay merges them back into a single message with the
/// target list concatenated.
fn id_fanout_merges<S: StateMachine>(sm: &mut S, clock: &FakeClock) {
    let u1 = uid(1);
    let since = TimeOrOffset::At(clock.now());

    let m1 = msg_id(10);
    let m2 = msg_id(11);
    consume(sm, new_creation(&u1, &m1, None, "foos", "f1", None));
    clock.advance(Duration::seconds(1));
    consume(sm, new_creation(&u1, &m2, None, "bars", "b1", None));
    clock.advance(Duration::seconds(1));
    let m3 = msg_id(12);
    consume(sm, new_creation(&u1, &m3, None, "foos", "keep", None));
    clock.advance(Duration::seconds(1));
    let m4 = msg_id(13);
    consume(
        sm,
        new_dismissal_by_ids(&u1, &m4, None, &[m1.clone(), m2.clone()]),
    );

    let msgs = sm
        .in_band_messages_since(&u1, None, &since)
        .expect("replay");

    // The dismissed creations drop out; the surviving creation and the
    // merged dismissal remain, in ctime order.
    assert_eq!(msgs.len(), 2, "expected creation + merged dismissal");

    let keep = expect_update(&msgs[0]);
    assert_eq!(keep.metadata.msg_id, m3);
    let item = keep.creation.as_ref().expect("creation payload");
    assert_eq!(item.body.bytes(), b"keep");
    assert!(item.dtime.is_none());

    let dismissal_msg = expect_update(&msgs[1]);
    assert_eq!(dismissal_msg.metadata.msg_id, m4);
    assert!(dismissal_msg.creation.is_none());
    let d = dismissal_msg.dismissal.as_ref().expect("dismissal payload");
    assert_eq!(d.msg_ids, vec![m1, m2]);
    assert!(d.ranges.is_empty());
}

#[test]
fn id_fanout_merges_mem() {
    let clock = fake_clock();
    let mut sm = mem_engine(&clock);
    id_fanout_merges(&mut sm, &clock);
}

#[test]
fn id_fanout_merges_sql() {
    let clock = fake_clock();
    let mut sm = sql_engine(&clock);
    id_fanout_merges(&mut sm, &clock);
}

/// Range dismissals replay with their end time pinned to the instant it
/// resolved to at ingest.
fn range_replays_resolved<S: StateMachine>(sm: &mut S, clock: &FakeClock) {
    let u1 = uid(1);
    let t0 = clock.now();
    let since = TimeOrOffset::At(t0);

    consume(sm, new_creation(&u1, &msg_id(10), None, "foos", "f1", None));
    clock.advance(Duration::seconds(1));
    let m2 = msg_id(11);
    consume(
        sm,
        new_dismissal_by_range(&u1, &m2, None, "foos", TimeOrOffset::At(t0)),
    );

    let msgs = sm
        .in_band_messages_since(&u1, None, &since)
        .expect("replay");
    assert_eq!(msgs.len(), 1, "dismissed creation must not replay");

    let upd = expect_update(&msgs[0]);
    assert_eq!(upd.metadata.msg_id, m2);
    let d = upd.dismissal.as_ref().expect("dismissal payload");
    assert!(d.msg_ids.is_empty());
    assert_eq!(d.ranges.len(), 1);
    assert_eq!(d.ranges[0].category.as_str(), "foos");
    assert_eq!(d.ranges[0].end_time, TimeOrOffset::At(t0));
}

#[test]
fn range_replays_resolved_mem() {
    let clock = fake_clock();
    let mut sm = mem_engine(&clock);
    range_replays_resolved(&mut sm, &clock);
}

#[test]
fn range_replays_resolved_sql() {
    let clock = fake_clock();
    let mut sm = sql_engine(&clock);
    range_replays_resolved(&mut sm, &clock);
}

/// Sync messages appear in the log at their ctime position.
fn sync_appears_in_log<S: StateMachine>(sm: &mut S, clock: &FakeClock) {
    let u1 = uid(1);
    let since = TimeOrOffset::At(clock.now());

    let m1 = msg_id(10);
    consume(sm, new_creation(&u1, &m1, None, "foos", "f1", None));
    clock.advance(Duration::seconds(1));
    let m2 = msg_id(11);
    consume(sm, new_sync(&u1, &m2, None));

    let msgs = sm
        .in_band_messages_since(&u1, None, &since)
        .expect("replay");
    assert_eq!(msgs.len(), 2);
    assert_eq!(expect_update(&msgs[0]).metadata.msg_id, m1);
    let sync = msgs[1].as_sync().expect("expected a sync message");
    assert_eq!(sync.metadata.msg_id, m2);
}

#[test]
fn sync_appears_in_log_mem() {
    let clock = fake_clock();
    let mut sm = mem_engine(&clock);
    sync_appears_in_log(&mut sm, &clock);
}

#[test]
fn sync_appears_in_log_sql() {
    let clock = fake_clock();
    let mut sm = sql_engine(&clock);
    sync_appears_in_log(&mut sm, &clock);
}

/// The device predicate and the ctime cutoff both scope the log.
fn log_scoping<S: StateMachine>(sm: &mut S, clock: &FakeClock) {
    let u1 = uid(1);
    let d1 = device_id(21);
    let d2 = device_id(22);
    let t0 = clock.now();

    consume(sm, new_creation(&u1, &msg_id(10), Some(&d1), "foos", "f1", None));
    clock.advance(Duration::seconds(1));
    let t1 = clock.now();
    consume(sm, new_creation(&u1, &msg_id(11), Some(&d2), "foos", "f2", None));
    clock.advance(Duration::seconds(1));
    consume(sm, new_sync(&u1, &msg_id(12), None));

    // d1 sees its own messages plus broadcast ones.
    let for_d1 = sm
        .in_band_messages_since(&u1, Some(&d1), &TimeOrOffset::At(t0))
        .expect("replay");
    assert_eq!(for_d1.len(), 2);
    assert_eq!(for_d1[0].metadata().msg_id, msg_id(10));
    assert_eq!(for_d1[1].metadata().msg_id, msg_id(12));

    // The global query sees everything.
    let all = sm
        .in_band_messages_since(&u1, None, &TimeOrOffset::At(t0))
        .expect("replay");
    assert_eq!(all.len(), 3);

    // The cutoff is inclusive and drops strictly-earlier messages.
    let later = sm
        .in_band_messages_since(&u1, None, &TimeOrOffset::At(t1))
        .expect("replay");
    assert_eq!(later.len(), 2);
    assert_eq!(later[0].metadata().msg_id, msg_id(11));
}

#[test]
fn log_scoping_mem() {
    let clock = fake_clock();
    let mut sm = mem_engine(&clock);
    log_scoping(&mut sm, &clock);
}

#[test]
fn log_scoping_sql() {
    let clock = fake_clock();
    let mut sm = sql_engine(&clock);
    log_scoping(&mut sm, &clock);
}

#[test]
fn sql_metadata_log_covers_every_message() {
    let clock = fake_clock();
    let mut sm = sql_engine(&clock);
    let u1 = uid(1);
    let t0 = clock.now();

    consume(&mut sm, new_creation(&u1, &msg_id(10), None, "foos", "f1", None));
    clock.advance(Duration::seconds(1));
    let t1 = clock.now();
    consume(&mut sm, new_dismissal_by_ids(&u1, &msg_id(11), None, &[msg_id(10)]));
    clock.advance(Duration::seconds(1));
    consume(&mut sm, new_sync(&u1, &msg_id(12), None));

    // Unlike the payload replay, dismissed creations keep their envelope.
    let all = sm.in_band_metadata_since(&u1, None).expect("metadata log");
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].msg_id, msg_id(10));
    assert_eq!(all[0].ctime, Some(t0));
    assert_eq!(all[2].msg_type, gregor_core::InBandMsgType::Sync);

    let later = sm
        .in_band_metadata_since(&u1, Some(&TimeOrOffset::At(t1)))
        .expect("metadata log");
    assert_eq!(later.len(), 2);
    assert_eq!(later[0].msg_id, msg_id(11));
}

#[test]
fn sql_duplicate_surfaces_constraint_error() {
    let clock = fake_clock();
    let mut sm = sql_engine(&clock);
    let u1 = uid(1);

    consume(&mut sm, new_creation(&u1, &msg_id(10), None, "foos", "f1", None));
    let mut dup = new_creation(&u1, &msg_id(10), None, "foos", "f2", None);
    let err = sm.consume_message(&mut dup).unwrap_err();
    // The driver error comes through unchanged so callers can tell a
    // constraint violation from a transient failure.
    assert!(matches!(err, StoreError::Sqlite(_)), "got {err:?}");
}

#[test]
fn sql_reminders_rows_written() {
    let clock = fake_clock();
    let mut sm = sql_engine(&clock);
    let u1 = uid(1);
    let at = clock.now() + Duration::seconds(60);

    let mut m = new_creation(&u1, &msg_id(10), None, "foos", "f1", None);
    if let Some(ibm) = m.in_band_mut() {
        if let gregor_core::InBandMessage::Update(u) = ibm {
            if let Some(item) = &mut u.creation {
                item.notify_times = vec![
                    TimeOrOffset::At(at),
                    TimeOrOffset::offset(Duration::seconds(30)),
                ];
            }
        }
    }
    sm.consume_message(&mut m).expect("consume");

    let count: i64 = sm
        .database()
        .conn()
        .query_row(
            "SELECT COUNT(*) FROM reminders WHERE uid=?1 AND msgid=?2",
            rusqlite::params![u1.to_hex(), msg_id(10).to_hex()],
            |row| row.get(0),
        )
        .expect("count reminders");
    assert_eq!(count, 2);

    let earliest: i64 = sm
        .database()
        .conn()
        .query_row(
            "SELECT MIN(ntime) FROM reminders WHERE uid=?1",
            rusqlite::params![u1.to_hex()],
            |row| row.get(0),
        )
        .expect("min ntime");
    assert_eq!(
        earliest,
        (clock.now() + Duration::seconds(30)).timestamp_micros()
    );
}
