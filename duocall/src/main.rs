mod loopback;
mod media;
mod settings;
mod tracing_helper;

use std::env::args;

use anyhow::{bail, Result};
use duocall_lib::{
    relay::socket::TcpRelayConnector, transport::webrtc::WebRtcTransportFactory, CallController,
    CallEvent, RoomId,
};
use tokio::{spawn, sync::broadcast::error::RecvError};
use tracing::{info, warn};

use crate::{
    media::SilentAudioCapture,
    settings::{Settings, SETTINGS_FILE},
};

const USAGE: &str = "usage: duocall <entry-url-or-room> | new | loopback";

fn print_events(mut events: tokio::sync::broadcast::Receiver<CallEvent>) {
    spawn(async move {
        loop {
            match events.recv().await {
                Ok(CallEvent::StateChanged(state)) => println!("{:?}", state),
                Ok(CallEvent::RemoteStreamArrived { stream_id }) => {
                    println!("receiving stream {}", stream_id);
                }
                Ok(CallEvent::Failed(err)) => println!("call failed: {}", err),
                Ok(CallEvent::Ended { room }) => {
                    println!("call in room {} ended", room);
                    return;
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return,
            }
        }
    });
}

async fn call(settings: Settings, room: RoomId) -> Result<()> {
    let mut controller = CallController::new(
        settings.call.clone(),
        SilentAudioCapture,
        TcpRelayConnector::new(settings.relay.clone()),
        WebRtcTransportFactory::new(settings.call.ice_servers.clone()),
    );
    print_events(controller.subscribe());
    controller.start_call(Some(room)).await?;
    if let Some(hang_up) = controller.hang_up_handle() {
        spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("hanging up");
                hang_up.hang_up();
            }
        });
    }
    controller.run_until_closed().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let (settings, problem) = Settings::load(SETTINGS_FILE).await;
    tracing_helper::init_tracing(&settings.log_dir, concat!(env!("CARGO_PKG_NAME"), ".log"))?;
    if let Some(problem) = problem {
        warn!("{}, using defaults", problem);
    }

    let Some(arg) = args().nth(1) else {
        bail!(USAGE);
    };
    match arg.as_str() {
        "loopback" => loopback::run(settings).await,
        "new" => {
            let room = RoomId::random();
            println!("room: {}", room);
            call(settings, room).await
        }
        entry => call(settings, RoomId::from_entry(entry)?).await,
    }
}
