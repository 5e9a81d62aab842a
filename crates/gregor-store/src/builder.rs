//! Append-only SQL accumulator.
//!
//! Fragments are joined with single spaces at finalization; every `?` in a
//! fragment corresponds positionally to exactly one appended parameter.
//! Time fragments delegate to the [`TimeDialect`] so callers can mix
//! literal arguments and dialect-spelled instants symmetrically.

use chrono::{DateTime, Utc};
use gregor_core::{Clock, TimeOrOffset};
use rusqlite::types::Value;
use rusqlite::Connection;

use crate::dialect::TimeDialect;

pub struct QueryBuilder<'a> {
    frags: Vec<String>,
    params: Vec<Value>,
    dialect: &'a dyn TimeDialect,
    clock: &'a dyn Clock,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(dialect: &'a dyn TimeDialect, clock: &'a dyn Clock) -> Self {
        QueryBuilder {
            frags: Vec::new(),
            params: Vec::new(),
            dialect,
            clock,
        }
    }

    /// Append a fragment and the parameters backing its `?` placeholders.
    pub fn push(&mut self, frag: &str, params: Vec<Value>) {
        self.frags.push(frag.to_string());
        self.params.extend(params);
    }

    /// Append the dialect's spelling of the current instant.
    pub fn now(&mut self) {
        let (dialect, clock) = (self.dialect, self.clock);
        dialect.emit_now(self, clock);
    }

    /// Append the dialect's spelling of a [`TimeOrOffset`].
    pub fn time_or_offset(&mut self, t: &TimeOrOffset) {
        let (dialect, clock) = (self.dialect, self.clock);
        dialect.emit_time_or_offset(self, clock, t);
    }

    /// An absolute instant as a bare driver parameter.
    pub fn time_arg(&self, t: DateTime<Utc>) -> Value {
        self.dialect.bind_time(t)
    }

    /// Append `?` bound to an absolute instant.
    pub fn push_time(&mut self, t: DateTime<Utc>) {
        let arg = self.time_arg(t);
        self.push("?", vec![arg]);
    }

    pub fn sql(&self) -> String {
        self.frags.join(" ")
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Prepare and execute against a connection or open transaction.
    pub fn exec(&self, conn: &Connection) -> rusqlite::Result<usize> {
        let mut stmt = conn.prepare(&self.sql())?;
        stmt.execute(rusqlite::params_from_iter(self.params.iter()))
    }
}
