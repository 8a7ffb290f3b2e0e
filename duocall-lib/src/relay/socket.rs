use std::sync::Arc;

use async_trait::async_trait;
use derive_new::new;
use tokio::{
    io::{split, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, WriteHalf},
    net::TcpStream,
    spawn,
    sync::Mutex,
    task::JoinHandle,
};
use tracing::{debug, info, trace, warn};

use crate::{call::EventSink, error::RelayError, signaling::RelayEvent};

use super::{RelayChannel, RelayConnector};

/// Relay channel over a byte stream. Each message is one line of JSON.
pub struct SocketRelay<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    writer: Mutex<Option<WriteHalf<T>>>,
    reader: JoinHandle<()>,
}

impl<T> SocketRelay<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn spawn(read_write: T, events: EventSink) -> Self {
        let (read_half, write_half) = split(read_write);
        let reader = spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        debug!("relay connection closed by the server");
                        break;
                    }
                    Err(err) => {
                        warn!("relay read failed: {}", err);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<RelayEvent>(&line) {
                    Ok(event) => {
                        trace!("relay <- {}", event.name());
                        events.relay(event);
                    }
                    Err(err) => warn!("unreadable relay message ({}): {}", err, line),
                }
            }
            events.relay_closed();
        });
        Self {
            writer: Mutex::new(Some(write_half)),
            reader,
        }
    }
}

impl<T> Drop for SocketRelay<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl<T> RelayChannel for SocketRelay<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn emit(&self, event: RelayEvent) -> Result<(), RelayError> {
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        let writer = writer
            .as_mut()
            .ok_or_else(|| RelayError("relay channel is closed".to_owned()))?;
        trace!("relay -> {}", event.name());
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&self) {
        self.reader.abort();
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(err) = writer.shutdown().await {
                debug!("relay shutdown failed: {}", err);
            }
        }
    }
}

/// Connects to a relay server over TCP.
#[derive(new)]
pub struct TcpRelayConnector {
    addr: String,
}

#[async_trait]
impl RelayConnector for TcpRelayConnector {
    async fn open(&self, events: EventSink) -> Result<Arc<dyn RelayChannel>, RelayError> {
        info!("connecting to relay {}", self.addr);
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        Ok(Arc::new(SocketRelay::spawn(stream, events)))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use crate::{
        room::RoomId,
        signaling::SessionDescription,
        testing::{next_input, Observed},
    };

    use super::*;

    #[tokio::test]
    async fn lines_in_both_directions() {
        let (client, server) = duplex(4096);
        let (sink, mut rx) = EventSink::test_channel();
        let relay = SocketRelay::spawn(client, sink);
        let (server_read, mut server_write) = tokio::io::split(server);

        relay
            .emit(RelayEvent::Join(RoomId::new("R").unwrap()))
            .await
            .unwrap();
        let mut server_lines = BufReader::new(server_read).lines();
        assert_eq!(
            server_lines.next_line().await.unwrap().unwrap(),
            r#"{"event":"join","data":"R"}"#
        );

        server_write
            .write_all(b"{\"event\":\"joined\"}\nnot json\n\n{\"event\":\"invite\",\"data\":{\"type\":\"offer\",\"sdp\":\"v=0\"}}\n")
            .await
            .unwrap();
        assert_eq!(
            next_input(&mut rx).await,
            Observed::Relay(RelayEvent::Joined)
        );
        assert_eq!(
            next_input(&mut rx).await,
            Observed::Relay(RelayEvent::Invite(SessionDescription::offer("v=0")))
        );

        drop(server_write);
        drop(server_lines);
        assert_eq!(next_input(&mut rx).await, Observed::RelayClosed);

        relay.close().await;
        assert!(relay
            .emit(RelayEvent::Bye(RoomId::new("R").unwrap()))
            .await
            .is_err());
    }
}
