use std::fmt;

/// Lifecycle of the single logical connection to the remote model.
///
/// `Idle` is the initial state. `Closed` and `Errored` end a session; a new
/// `connect` starts the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    Errored,
}

impl SessionState {
    /// The only state in which outbound media may be sent.
    pub fn is_open(self) -> bool {
        self == SessionState::Open
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Errored)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
            SessionState::Errored => "errored",
        };
        f.write_str(s)
    }
}
