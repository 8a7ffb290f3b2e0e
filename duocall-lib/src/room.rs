use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CallError;

const ROOM_QUERY_KEY: &str = "roomId";

/// Name of the room two participants share for one session.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(name: impl Into<String>) -> Result<Self, CallError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CallError::Configuration("room id is empty".to_owned()));
        }
        Ok(Self(name))
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Extracts the room from an entry context: either a URL carrying a
    /// `roomId` query parameter or a bare room name.
    pub fn from_entry(entry: &str) -> Result<Self, CallError> {
        let Some((_, query)) = entry.split_once('?') else {
            if entry.contains("://") {
                return Err(CallError::Configuration(format!(
                    "no {} parameter in {}",
                    ROOM_QUERY_KEY, entry
                )));
            }
            return Self::new(entry);
        };
        let query = query.split('#').next().unwrap_or_default();
        let value = query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == ROOM_QUERY_KEY)
            .map(|(_, value)| value)
            .ok_or_else(|| {
                CallError::Configuration(format!("no {} parameter in {}", ROOM_QUERY_KEY, entry))
            })?;
        let value = value.replace('+', " ");
        let value = urlencoding::decode(&value)
            .map_err(|err| CallError::Configuration(err.to_string()))?;
        Self::new(value.into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
