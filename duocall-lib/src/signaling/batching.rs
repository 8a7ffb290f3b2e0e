//! When local candidates reach the peer.
//!
//! The machine asks the policy about every local candidate event, including
//! the `None` sentinel the transport emits once gathering has finished.

use serde::Deserialize;

use super::IceCandidate;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CandidateAction {
    Ignore,
    /// The local description is complete and should be sent now.
    FlushDescription,
    /// Send this candidate on its own as `ice_candidate`.
    SendCandidate,
}

pub trait CandidatePolicy: Send + Sync {
    fn on_local_candidate(&self, candidate: Option<&IceCandidate>) -> CandidateAction;

    /// Whether a freshly set local description goes out without waiting for
    /// gathering to finish.
    fn flush_on_local_description(&self) -> bool;
}

/// Candidates are folded into the local description, which is sent once when
/// gathering completes.
#[derive(Clone, Copy, Debug, Default)]
pub struct BatchPolicy;

impl CandidatePolicy for BatchPolicy {
    fn on_local_candidate(&self, candidate: Option<&IceCandidate>) -> CandidateAction {
        match candidate {
            None => CandidateAction::FlushDescription,
            Some(_) => CandidateAction::Ignore,
        }
    }

    fn flush_on_local_description(&self) -> bool {
        false
    }
}

/// The description is sent as soon as it is set and every candidate follows
/// as it is discovered.
#[derive(Clone, Copy, Debug, Default)]
pub struct TricklePolicy;

impl CandidatePolicy for TricklePolicy {
    fn on_local_candidate(&self, candidate: Option<&IceCandidate>) -> CandidateAction {
        match candidate {
            None => CandidateAction::Ignore,
            Some(_) => CandidateAction::SendCandidate,
        }
    }

    fn flush_on_local_description(&self) -> bool {
        true
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandidateMode {
    #[default]
    Batch,
    Trickle,
}

impl CandidateMode {
    pub fn policy(self) -> Box<dyn CandidatePolicy> {
        match self {
            CandidateMode::Batch => Box::new(BatchPolicy),
            CandidateMode::Trickle => Box::new(TricklePolicy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate() -> IceCandidate {
        IceCandidate {
            candidate: "candidate:1 1 udp 1 192.0.2.1 5000 typ host".to_owned(),
            ..Default::default()
        }
    }

    #[test]
    fn batch_waits_for_the_sentinel() {
        let policy = BatchPolicy;
        assert!(!policy.flush_on_local_description());
        assert_eq!(
            policy.on_local_candidate(Some(&candidate())),
            CandidateAction::Ignore
        );
        assert_eq!(
            policy.on_local_candidate(None),
            CandidateAction::FlushDescription
        );
    }

    #[test]
    fn trickle_sends_each_candidate() {
        let policy = TricklePolicy;
        assert!(policy.flush_on_local_description());
        assert_eq!(
            policy.on_local_candidate(Some(&candidate())),
            CandidateAction::SendCandidate
        );
        assert_eq!(policy.on_local_candidate(None), CandidateAction::Ignore);
    }
}
