//! v001 -- Initial schema creation.
//!
//! Creates the five core tables: `messages`, `items`, `reminders`,
//! `dismissals_by_id`, and `dismissals_by_time`. Id columns hold
//! hex-encoded 8-byte identifiers (16 chars); time columns hold INTEGER
//! microseconds since the Unix epoch.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Messages: one row per consumed in-band message
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    uid   CHAR(16) NOT NULL,            -- hex-encoded 8-byte user id
    msgid CHAR(16) NOT NULL,            -- hex-encoded 8-byte message id
    ctime INTEGER  NOT NULL,            -- microseconds since epoch
    devid CHAR(16),                     -- NULL = all devices of the user
    mtype INTEGER  NOT NULL,            -- 1 = update, 2 = sync

    PRIMARY KEY (uid, msgid)
);

-- ----------------------------------------------------------------
-- Items: the visible unit of state, one per creation
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS items (
    uid      CHAR(16)     NOT NULL,
    msgid    CHAR(16)     NOT NULL,
    category VARCHAR(128) NOT NULL,
    dtime    INTEGER,                   -- NULL = visible until dismissed
    body     BLOB,

    FOREIGN KEY (uid, msgid) REFERENCES messages (uid, msgid),
    PRIMARY KEY (uid, msgid)
);

CREATE INDEX IF NOT EXISTS user_order ON items (uid, category);

CREATE INDEX IF NOT EXISTS cleanup_order ON items (uid, dtime);

-- ----------------------------------------------------------------
-- Reminders: scheduled notify instants for an item
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS reminders (
    uid   CHAR(16) NOT NULL,
    msgid CHAR(16) NOT NULL,
    ntime INTEGER  NOT NULL,

    PRIMARY KEY (uid, msgid, ntime)
);

-- ----------------------------------------------------------------
-- Dismissals, per target message id
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS dismissals_by_id (
    uid    CHAR(16) NOT NULL,
    msgid  CHAR(16) NOT NULL,
    dmsgid CHAR(16) NOT NULL,           -- the message id being dismissed

    FOREIGN KEY (uid, msgid) REFERENCES messages (uid, msgid),
    PRIMARY KEY (uid, msgid, dmsgid)
);

-- ----------------------------------------------------------------
-- Dismissals, per category up to an end time
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS dismissals_by_time (
    uid      CHAR(16)     NOT NULL,
    msgid    CHAR(16)     NOT NULL,
    category VARCHAR(128) NOT NULL,
    dtime    INTEGER      NOT NULL,     -- retire matching items created at or before

    FOREIGN KEY (uid, msgid) REFERENCES messages (uid, msgid),
    PRIMARY KEY (uid, msgid, category, dtime)
);
"#;

pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}
