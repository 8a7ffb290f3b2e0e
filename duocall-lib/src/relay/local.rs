//! In-process relay for two members of a room.
//!
//! The first member of a room receives `created`, the second receives
//! `joined` (and the first `new_peer`), a third receives `full`. Everything
//! else is forwarded to the other member of the sender's room.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::{call::EventSink, error::RelayError, room::RoomId, signaling::RelayEvent};

use super::{RelayChannel, RelayConnector};

const ROOM_CAPACITY: usize = 2;

struct Member {
    id: usize,
    events: EventSink,
}

#[derive(Default)]
struct Hub {
    next_id: usize,
    rooms: HashMap<RoomId, Vec<Member>>,
    emitted: Option<Vec<(usize, RelayEvent)>>,
}

impl Hub {
    fn room_of(&self, member_id: usize) -> Option<RoomId> {
        self.rooms
            .iter()
            .find(|(_, members)| members.iter().any(|m| m.id == member_id))
            .map(|(room, _)| room.clone())
    }

    fn leave(&mut self, member_id: usize) {
        for members in self.rooms.values_mut() {
            members.retain(|m| m.id != member_id);
        }
        self.rooms.retain(|_, members| !members.is_empty());
    }

    fn forward(&self, room: &RoomId, from: usize, event: &RelayEvent) {
        for member in self.rooms[room].iter().filter(|m| m.id != from) {
            member.events.relay(event.clone());
        }
    }
}

#[derive(Clone, Default)]
pub struct LocalRelay {
    hub: Arc<Mutex<Hub>>,
}

impl LocalRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// A relay that also keeps every emitted event for [`LocalRelay::emitted`].
    pub fn recording() -> Self {
        let relay = Self::default();
        relay.hub().emitted = Some(Vec::new());
        relay
    }

    fn hub(&self) -> MutexGuard<'_, Hub> {
        // A poisoned hub only means a member panicked mid-delivery.
        self.hub.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every event emitted so far, tagged with the member that sent it.
    /// Members are numbered in the order their channels were opened. Always
    /// empty unless the relay was made with [`LocalRelay::recording`].
    pub fn emitted(&self) -> Vec<(usize, RelayEvent)> {
        self.hub().emitted.clone().unwrap_or_default()
    }

    pub fn members(&self, room: &RoomId) -> usize {
        self.hub().rooms.get(room).map_or(0, |members| members.len())
    }
}

#[async_trait]
impl RelayConnector for LocalRelay {
    async fn open(&self, events: EventSink) -> Result<Arc<dyn RelayChannel>, RelayError> {
        let id = {
            let mut hub = self.hub();
            hub.next_id += 1;
            hub.next_id - 1
        };
        Ok(Arc::new(LocalRelayChannel {
            relay: self.clone(),
            id,
            events,
        }))
    }
}

struct LocalRelayChannel {
    relay: LocalRelay,
    id: usize,
    events: EventSink,
}

#[async_trait]
impl RelayChannel for LocalRelayChannel {
    async fn emit(&self, event: RelayEvent) -> Result<(), RelayError> {
        let mut hub = self.relay.hub();
        trace!("member {} -> {}", self.id, event.name());
        if let Some(emitted) = &mut hub.emitted {
            emitted.push((self.id, event.clone()));
        }
        if let RelayEvent::Join(room) = event {
            if hub.room_of(self.id).is_some() {
                return Err(RelayError("already in a room".to_owned()));
            }
            let members = hub.rooms.entry(room.clone()).or_default();
            match members.len() {
                0 => {
                    members.push(Member {
                        id: self.id,
                        events: self.events.clone(),
                    });
                    self.events.relay(RelayEvent::Created(room));
                }
                n if n < ROOM_CAPACITY => {
                    for member in members.iter() {
                        member.events.relay(RelayEvent::NewPeer);
                    }
                    members.push(Member {
                        id: self.id,
                        events: self.events.clone(),
                    });
                    self.events.relay(RelayEvent::Joined);
                }
                _ => {
                    debug!("room {} is full", room);
                    self.events.relay(RelayEvent::Full);
                }
            }
            return Ok(());
        }
        let room = hub
            .room_of(self.id)
            .ok_or_else(|| RelayError("not in a room".to_owned()))?;
        hub.forward(&room, self.id, &event);
        if matches!(event, RelayEvent::Bye(_)) {
            hub.leave(self.id);
        }
        Ok(())
    }

    async fn close(&self) {
        self.relay.hub().leave(self.id);
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{next_input, Observed};

    use super::*;

    #[tokio::test]
    async fn room_membership() {
        let relay = LocalRelay::recording();
        let room = RoomId::new("R").unwrap();
        let (a_sink, mut a_rx) = EventSink::test_channel();
        let (b_sink, mut b_rx) = EventSink::test_channel();
        let (c_sink, mut c_rx) = EventSink::test_channel();
        let a = relay.open(a_sink).await.unwrap();
        let b = relay.open(b_sink).await.unwrap();
        let c = relay.open(c_sink).await.unwrap();

        a.emit(RelayEvent::Join(room.clone())).await.unwrap();
        assert_eq!(
            next_input(&mut a_rx).await,
            Observed::Relay(RelayEvent::Created(room.clone()))
        );
        b.emit(RelayEvent::Join(room.clone())).await.unwrap();
        assert_eq!(
            next_input(&mut b_rx).await,
            Observed::Relay(RelayEvent::Joined)
        );
        assert_eq!(
            next_input(&mut a_rx).await,
            Observed::Relay(RelayEvent::NewPeer)
        );
        c.emit(RelayEvent::Join(room.clone())).await.unwrap();
        assert_eq!(next_input(&mut c_rx).await, Observed::Relay(RelayEvent::Full));
        assert_eq!(relay.members(&room), 2);

        b.emit(RelayEvent::Bye(room.clone())).await.unwrap();
        assert_eq!(
            next_input(&mut a_rx).await,
            Observed::Relay(RelayEvent::Bye(room.clone()))
        );
        assert_eq!(relay.members(&room), 1);
        assert!(c.emit(RelayEvent::Bye(room.clone())).await.is_err());

        a.close().await;
        assert_eq!(relay.members(&room), 0);
        assert_eq!(relay.emitted().len(), 5);
    }

    #[tokio::test]
    async fn plain_relay_keeps_no_history() {
        let relay = LocalRelay::new();
        let room = RoomId::new("R").unwrap();
        let (sink, mut rx) = EventSink::test_channel();
        let member = relay.open(sink).await.unwrap();

        member.emit(RelayEvent::Join(room.clone())).await.unwrap();
        assert_eq!(
            next_input(&mut rx).await,
            Observed::Relay(RelayEvent::Created(room.clone()))
        );
        member.emit(RelayEvent::Bye(room)).await.unwrap();
        assert!(relay.emitted().is_empty());
    }
}
