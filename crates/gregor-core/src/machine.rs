//! The state-machine contract surfaced to the broadcast/network layer.

use crate::message::{InBandMessage, Message, State};
use crate::types::{DeviceId, TimeOrOffset, Uid};

/// A per-user notification state machine. Implementations replicate each
/// other's observable behavior exactly; the conformance suite runs the same
/// scenarios against every one of them.
pub trait StateMachine {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Apply one incoming message. Out-of-band messages are ignored;
    /// in-band updates apply atomically or not at all. When the caller left
    /// the metadata ctime unset, the assigned instant is written back into
    /// `m` so downstream layers see a concrete creation time.
    fn consume_message(&mut self, m: &mut Message) -> Result<(), Self::Error>;

    /// The state of user `u` at time `t`. A `None` device means the global
    /// state across all devices; a `None` time means now. An item stored
    /// without a device id is visible to every device query.
    fn state(
        &self,
        u: &Uid,
        d: Option<&DeviceId>,
        t: Option<&TimeOrOffset>,
    ) -> Result<State, Self::Error>;

    /// Every in-band message for `u` with ctime ≥ `t`, ascending, merged by
    /// msgid. A `None` device returns messages for all devices; a concrete
    /// device also sees broadcast (deviceless) messages.
    fn in_band_messages_since(
        &self,
        u: &Uid,
        d: Option<&DeviceId>,
        t: &TimeOrOffset,
    ) -> Result<Vec<InBandMessage>, Self::Error>;
}
