pub mod clock;
pub mod factory;
pub mod machine;
pub mod mem;
pub mod message;
pub mod types;

mod error;

pub use clock::{Clock, FakeClock, SystemClock};
pub use error::GregorError;
pub use factory::{HexFactory, ObjFactory};
pub use machine::StateMachine;
pub use mem::MemEngine;
pub use message::{
    Dismissal, InBandMessage, Item, Message, Metadata, MsgRange, OutOfBandMessage, State,
    StateSync, StateUpdate,
};
pub use types::{Body, Category, DeviceId, InBandMsgType, MsgId, System, TimeOrOffset, Uid};
