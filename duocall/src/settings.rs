use std::io::ErrorKind;

use duocall_lib::CallConfig;
use serde::Deserialize;
use tokio::fs::read_to_string;

pub const SETTINGS_FILE: &str = "duocall.toml";

/// Contents of `duocall.toml`. Call settings sit at the top level next to
/// the client's own keys.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// `host:port` of the relay server.
    pub relay: String,
    pub log_dir: String,
    #[serde(flatten)]
    pub call: CallConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            relay: "127.0.0.1:8080".to_owned(),
            log_dir: "./".to_owned(),
            call: CallConfig::default(),
        }
    }
}

impl Settings {
    fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Falls back to the defaults when the file is missing or broken. A file
    /// that exists but cannot be used is reported alongside the defaults;
    /// tracing is not set up yet when this runs.
    pub async fn load(path: &str) -> (Self, Option<String>) {
        let text = match read_to_string(path).await {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return (Self::default(), None),
            Err(err) => {
                return (
                    Self::default(),
                    Some(format!("failed to read {}: {}", path, err)),
                );
            }
        };
        match Self::parse(&text) {
            Ok(settings) => (settings, None),
            Err(err) => (Self::default(), Some(format!("invalid {}: {}", path, err))),
        }
    }
}

#[cfg(test)]
mod tests {
    use duocall_lib::signaling::batching::CandidateMode;

    use super::*;

    #[test]
    fn empty_file_means_defaults() {
        assert_eq!(Settings::parse("").unwrap(), Settings::default());
    }

    #[test]
    fn call_settings_at_top_level() {
        let settings = Settings::parse(
            r#"
relay = "relay.example.com:9000"
ice_servers = ["stun:stun.example.com:3478"]
candidates = "trickle"
peer_timeout_secs = 30

[media]
video = true
"#,
        )
        .unwrap();
        assert_eq!(settings.relay, "relay.example.com:9000");
        assert_eq!(settings.log_dir, "./");
        assert_eq!(settings.call.ice_servers, ["stun:stun.example.com:3478"]);
        assert_eq!(settings.call.candidates, CandidateMode::Trickle);
        assert_eq!(settings.call.join_timeout_secs, 10);
        assert_eq!(settings.call.peer_timeout_secs, 30);
        assert!(settings.call.media.audio);
        assert!(settings.call.media.video);
    }

    #[tokio::test]
    async fn missing_file_means_defaults() {
        assert_eq!(
            Settings::load("does/not/exist/duocall.toml").await,
            (Settings::default(), None)
        );
    }

    #[tokio::test]
    async fn broken_file_means_defaults_and_a_report() {
        let path = std::env::temp_dir().join(format!("duocall-{}-broken.toml", std::process::id()));
        tokio::fs::write(&path, "relay = [").await.unwrap();
        let path = path.to_str().unwrap().to_owned();

        let (settings, problem) = Settings::load(&path).await;

        tokio::fs::remove_file(&path).await.unwrap();
        assert_eq!(settings, Settings::default());
        let problem = problem.unwrap();
        assert!(problem.starts_with("invalid "), "{problem}");
        assert!(problem.contains(&path), "{problem}");
    }

    #[test]
    fn broken_file_is_rejected() {
        assert!(Settings::parse("relay = [").is_err());
    }
}
