use thiserror::Error;

use crate::{room::RoomId, signaling::machine::SignalingState};

/// A stage of the handshake that can be bounded by a timeout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Waiting for the relay to confirm membership.
    Join,
    /// Waiting for the peer and for the transport to connect.
    Peer,
}

/// Errors that end a call attempt.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CallError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("a call is already active")]
    AlreadyActive,
    #[error("local media unavailable: {0}")]
    Capture(String),
    #[error("room {0} is full")]
    RoomFull(RoomId),
    #[error("relay channel failed: {0}")]
    Relay(String),
    #[error("negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),
    #[error("timed out in {0:?} stage")]
    Timeout(Stage),
}

/// The transport rejected a description or candidate, or failed outright.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct NegotiationError(pub String);

impl NegotiationError {
    pub fn msg(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl From<webrtc::Error> for NegotiationError {
    fn from(err: webrtc::Error) -> Self {
        Self(err.to_string())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct CaptureError(pub String);

impl From<CaptureError> for CallError {
    fn from(err: CaptureError) -> Self {
        Self::Capture(err.0)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct RelayError(pub String);

impl From<RelayError> for CallError {
    fn from(err: RelayError) -> Self {
        Self::Relay(err.0)
    }
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        Self(err.to_string())
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        Self(err.to_string())
    }
}

/// An input arrived in a state where its precondition does not hold.
/// Violations are logged and the input is dropped.
#[derive(Clone, Debug, Error, PartialEq, Eq, derive_new::new)]
#[error("{input} is not acceptable in {state:?}: {reason}")]
pub struct ProtocolViolation {
    pub state: SignalingState,
    pub input: &'static str,
    pub reason: &'static str,
}

/// A best-effort cleanup step failed. Never propagated.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("teardown step `{step}` failed: {message}")]
pub struct TeardownError {
    pub step: &'static str,
    pub message: String,
}

impl TeardownError {
    pub fn new(step: &'static str, message: impl ToString) -> Self {
        Self {
            step,
            message: message.to_string(),
        }
    }
}
