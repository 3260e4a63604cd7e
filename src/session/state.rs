//! Session state machine
//!
//! ```text
//! Disconnected -> Connecting -> Connected(session_present) -> Receiving
//!       ^              |                 |                      |
//!       |              +-----> Failed <--+----------------------+
//!       +--------------------- (close from any state)
//! ```

use tracing::{error, info, warn};

/// Where the session currently is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected { session_present: bool },
    Receiving,
    Failed(String),
}

/// Inputs that move the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    ConnectStarted,
    ConnAckReceived { session_present: bool },
    ReceiveStarted,
    Failed(String),
    Closed,
}

impl SessionState {
    /// Next state for `event`, or `None` if the transition is not allowed (pure)
    pub fn next(&self, event: &SessionEvent) -> Option<SessionState> {
        use SessionEvent as E;
        use SessionState as S;

        match (self, event) {
            (S::Disconnected | S::Failed(_), E::ConnectStarted) => Some(S::Connecting),
            (S::Connecting, E::ConnAckReceived { session_present }) => Some(S::Connected {
                session_present: *session_present,
            }),
            (S::Connected { .. }, E::ReceiveStarted) => Some(S::Receiving),
            (S::Connecting | S::Connected { .. } | S::Receiving, E::Failed(reason)) => {
                Some(S::Failed(reason.clone()))
            }
            (_, E::Closed) => Some(S::Disconnected),
            _ => None,
        }
    }

    /// Connected to the broker, whether or not the loop is running
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected { .. } | SessionState::Receiving)
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected { .. } => "connected",
            SessionState::Receiving => "receiving",
            SessionState::Failed(_) => "failed",
        }
    }
}

/// Log a state transition
pub fn log_state_transition(from: &SessionState, to: &SessionState) {
    match (from, to) {
        (SessionState::Connecting, SessionState::Connected { session_present }) => {
            info!(session_present, "connect ok");
        }
        (_, SessionState::Failed(reason)) => {
            error!("session failed: {}", reason);
        }
        (SessionState::Receiving, SessionState::Disconnected) => {
            warn!("receive loop ended, session disconnected");
        }
        _ => {
            info!("session state: {} -> {}", from.label(), to.label());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let s = SessionState::Disconnected;
        let s = s.next(&SessionEvent::ConnectStarted).unwrap();
        assert_eq!(s, SessionState::Connecting);
        let s = s
            .next(&SessionEvent::ConnAckReceived {
                session_present: true,
            })
            .unwrap();
        assert_eq!(
            s,
            SessionState::Connected {
                session_present: true
            }
        );
        let s = s.next(&SessionEvent::ReceiveStarted).unwrap();
        assert_eq!(s, SessionState::Receiving);
        assert!(s.is_connected());
        let s = s.next(&SessionEvent::Closed).unwrap();
        assert_eq!(s, SessionState::Disconnected);
    }

    #[test]
    fn test_failed_can_reconnect() {
        let failed = SessionState::Failed("auth".to_string());
        assert_eq!(
            failed.next(&SessionEvent::ConnectStarted),
            Some(SessionState::Connecting)
        );
        assert!(!failed.is_connected());
    }

    #[test]
    fn test_invalid_transitions() {
        assert_eq!(SessionState::Receiving.next(&SessionEvent::ConnectStarted), None);
        assert_eq!(
            SessionState::Disconnected.next(&SessionEvent::ReceiveStarted),
            None
        );
        assert_eq!(
            SessionState::Disconnected.next(&SessionEvent::ConnAckReceived {
                session_present: false
            }),
            None
        );
        assert_eq!(
            SessionState::Disconnected.next(&SessionEvent::Failed("x".to_string())),
            None
        );
    }

    #[test]
    fn test_close_from_any_state() {
        for state in [
            SessionState::Disconnected,
            SessionState::Connecting,
            SessionState::Connected {
                session_present: false,
            },
            SessionState::Receiving,
            SessionState::Failed("x".to_string()),
        ] {
            assert_eq!(
                state.next(&SessionEvent::Closed),
                Some(SessionState::Disconnected)
            );
        }
    }
}
