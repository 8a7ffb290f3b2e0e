use std::time::Duration;

use anyhow::Result;
use duocall_lib::{
    relay::local::LocalRelay, signaling::machine::SignalingState,
    transport::webrtc::WebRtcTransportFactory, CallController, CallEvent, RoomId,
};
use tokio::{join, spawn, sync::broadcast::error::RecvError, time::sleep};
use tracing::{info, warn};

use crate::{media::SilentAudioCapture, settings::Settings};

const CONNECTED_FOR: Duration = Duration::from_secs(5);

/// Calls itself: two participants in this process share a room over an
/// in-memory relay and connect through real peer connections.
pub async fn run(settings: Settings) -> Result<()> {
    let relay = LocalRelay::new();
    let new_participant = || {
        CallController::new(
            settings.call.clone(),
            SilentAudioCapture,
            relay.clone(),
            WebRtcTransportFactory::new(settings.call.ice_servers.clone()),
        )
    };
    let mut callee = new_participant();
    let mut caller = new_participant();
    let room = RoomId::random();
    println!("loopback room: {}", room);

    let mut events = caller.subscribe();
    callee.start_call(Some(room.clone())).await?;
    caller.start_call(Some(room)).await?;
    let (Some(hang_up), Some(ctrl_c_hang_up)) =
        (caller.hang_up_handle(), callee.hang_up_handle())
    else {
        anyhow::bail!("call ended during setup");
    };

    spawn(async move {
        loop {
            match events.recv().await {
                Ok(CallEvent::RemoteStreamArrived { stream_id }) => {
                    info!("caller receives stream {}", stream_id);
                }
                Ok(CallEvent::StateChanged(state)) => {
                    println!("caller: {:?}", state);
                    if state == SignalingState::Connected {
                        sleep(CONNECTED_FOR).await;
                        hang_up.hang_up();
                    }
                }
                Ok(CallEvent::Ended { .. }) | Err(RecvError::Closed) => return,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
            }
        }
    });
    spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_hang_up.hang_up();
        }
    });

    let (caller_result, callee_result) =
        join!(caller.run_until_closed(), callee.run_until_closed());
    if let Err(err) = &callee_result {
        warn!("callee: {}", err);
    }
    caller_result?;
    callee_result?;
    println!("loopback call completed");
    Ok(())
}
