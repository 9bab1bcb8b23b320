use std::fmt;

/// Lifecycle of the live connection.
///
/// Idle → Connecting → Subscribed → Closing → Closed, with Errored reachable
/// from Connecting or Subscribed. Errored is terminal for its generation; only
/// a fresh generation (reconnect or viewport change) leaves it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Subscribed,
    Closing,
    Closed,
    Errored,
}

impl ConnectionState {
    pub fn can_transition_to(self, to: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, to),
            (Idle, Connecting)
                | (Idle, Closed)
                | (Connecting, Subscribed)
                | (Connecting, Closing)
                | (Connecting, Errored)
                | (Subscribed, Closing)
                | (Subscribed, Errored)
                | (Closing, Idle)
                | (Closing, Closed)
                | (Errored, Connecting)
                | (Errored, Closed)
        )
    }

    /// A socket exists (or is being opened) for the current generation.
    pub fn is_active(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Subscribed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Subscribed => "subscribed",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::Errored => "errored",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::{self, *};

    #[test]
    fn starts_idle() {
        assert_eq!(ConnectionState::default(), Idle);
    }

    #[test]
    fn happy_path_is_legal() {
        let path = [Idle, Connecting, Subscribed, Closing, Closed];
        for w in path.windows(2) {
            assert!(w[0].can_transition_to(w[1]), "{} -> {}", w[0], w[1]);
        }
    }

    #[test]
    fn errored_only_from_active_states() {
        let all = [Idle, Connecting, Subscribed, Closing, Closed, Errored];
        let sources: Vec<ConnectionState> = all
            .into_iter()
            .filter(|s| s.can_transition_to(Errored))
            .collect();
        assert_eq!(sources, vec![Connecting, Subscribed]);
    }

    #[test]
    fn closed_is_terminal() {
        let all = [Idle, Connecting, Subscribed, Closing, Closed, Errored];
        assert!(all.iter().all(|s| !Closed.can_transition_to(*s)));
    }
}
