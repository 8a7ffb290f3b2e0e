use std::time::Duration;

use serde::Deserialize;

use crate::signaling::batching::CandidateMode;

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: false,
        }
    }
}

/// Settings of one call attempt. A timeout of `0` disables it.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CallConfig {
    pub ice_servers: Vec<String>,
    pub media: MediaConstraints,
    pub candidates: CandidateMode,
    pub join_timeout_secs: u64,
    pub peer_timeout_secs: u64,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![DEFAULT_STUN_SERVER.to_owned()],
            media: MediaConstraints::default(),
            candidates: CandidateMode::Batch,
            join_timeout_secs: 10,
            peer_timeout_secs: 0,
        }
    }
}

fn non_zero(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl CallConfig {
    pub fn join_timeout(&self) -> Option<Duration> {
        non_zero(self.join_timeout_secs)
    }

    pub fn peer_timeout(&self) -> Option<Duration> {
        non_zero(self.peer_timeout_secs)
    }
}
