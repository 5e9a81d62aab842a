use thiserror::Error;

#[derive(Error, Debug)]
pub enum GregorError {
    #[error("bad metadata: empty uid")]
    EmptyUid,

    #[error("bad metadata: empty msgid")]
    EmptyMsgId,

    #[error("bad metadata: unrecognized message type {0}")]
    UnrecognizedMsgType(u32),

    #[error("bad {field}: expected {expected} bytes, got {got}")]
    BadIdLength {
        field: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("empty category")]
    EmptyCategory,

    #[error("clash of creations for msgid {msgid}")]
    CreationClash { msgid: String },

    #[error("cannot merge sync messages")]
    SyncMergeConflict,

    #[error("duplicate msgid {msgid} for uid {uid}")]
    DuplicateMsgId { uid: String, msgid: String },
}
