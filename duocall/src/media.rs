use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use duocall_lib::{
    config::MediaConstraints,
    error::CaptureError,
    transport::{webrtc::LocalTracks, MediaCapture},
};
use tokio::{spawn, sync::watch, time::interval};
use tracing::{debug, trace};
use webrtc::{
    api::media_engine::MIME_TYPE_OPUS, media::Sample,
    rtp_transceiver::rtp_codec::RTCRtpCodecCapability,
    track::track_local::track_local_static_sample::TrackLocalStaticSample,
};

const FRAME: Duration = Duration::from_millis(20);
/// An Opus frame of silence.
const SILENCE: &[u8] = &[0xf8, 0xff, 0xfe];

/// Audio source without a device: sends Opus silence until stopped.
#[derive(Default)]
pub struct SilentAudioCapture;

#[async_trait]
impl MediaCapture for SilentAudioCapture {
    type Media = LocalTracks;

    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalTracks, CaptureError> {
        if constraints.video {
            return Err(CaptureError("no video source available".to_owned()));
        }
        if !constraints.audio {
            return Err(CaptureError("no media requested".to_owned()));
        }
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            "audio".to_owned(),
            "duocall".to_owned(),
        ));
        let media = LocalTracks::new(vec![track.clone()]);
        spawn(write_silence(track, media.subscribe_stopped()));
        Ok(media)
    }
}

async fn write_silence(track: Arc<TrackLocalStaticSample>, mut stopped: watch::Receiver<bool>) {
    let mut ticker = interval(FRAME);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = stopped.changed() => {
                if changed.is_err() || *stopped.borrow() {
                    break;
                }
                continue;
            }
        }
        let sample = Sample {
            data: Bytes::from_static(SILENCE),
            duration: FRAME,
            ..Default::default()
        };
        if let Err(err) = track.write_sample(&sample).await {
            trace!("write_sample failed: {}", err);
        }
    }
    debug!("local audio stopped");
}

#[cfg(test)]
mod tests {
    use duocall_lib::transport::LocalMedia;

    use super::*;

    #[tokio::test]
    async fn audio_only() {
        let media = SilentAudioCapture
            .acquire(&MediaConstraints::default())
            .await
            .unwrap();
        assert_eq!(media.tracks().len(), 1);
        media.stop().await.unwrap();
    }

    #[tokio::test]
    async fn video_is_unavailable() {
        let constraints = MediaConstraints {
            audio: true,
            video: true,
        };
        assert!(SilentAudioCapture.acquire(&constraints).await.is_err());
    }
}
