pub mod call;
pub mod config;
pub mod error;
pub mod relay;
pub mod room;
pub mod signaling;
#[cfg(test)]
mod testing;
pub mod transport;

pub use crate::{
    call::{CallController, CallEvent, HangUpHandle},
    config::CallConfig,
    error::CallError,
    room::RoomId,
};
