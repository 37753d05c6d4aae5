use std::fmt::{Display, Formatter};

/// Lifecycle of a proxy session. States only ever move forward.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionState {
    /// The socket connection is being initiated.
    Connecting,
    /// The `CONNECT` request was sent and the acknowledgment has not been recognized yet.
    AwaitingAck,
    /// The acknowledgment was recognized; bytes are relayed in both directions.
    Established,
    /// One endpoint closed after the handshake completed.
    ClosedClean,
    /// The socket peer closed before acknowledging.
    ClosedFailed,
}

impl SessionState {
    /// Whether the session has ended.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ClosedClean | Self::ClosedFailed)
    }

    /// Whether moving to `next` is a forward step.
    pub fn can_become(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, AwaitingAck)
                | (AwaitingAck, Established)
                | (AwaitingAck, ClosedFailed)
                | (Established, ClosedClean)
        )
    }

    /// Moves to `next`, failing on any backward or skipping transition.
    pub fn advance(&mut self, next: SessionState) -> anyhow::Result<()> {
        if !self.can_become(next) {
            return Err(anyhow::anyhow!(
                "Invalid session transition {} -> {}",
                self,
                next
            ));
        }
        debug!("Session {} -> {}", self, next);
        *self = next;
        Ok(())
    }

    /// The process exit status for a closed session.
    pub fn exit_code(&self) -> Option<u8> {
        match self {
            Self::ClosedClean => Some(0),
            Self::ClosedFailed => Some(1),
            _ => None,
        }
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::AwaitingAck => write!(f, "AwaitingAck"),
            SessionState::Established => write!(f, "Established"),
            SessionState::ClosedClean => write!(f, "Closed{{clean}}"),
            SessionState::ClosedFailed => write!(f, "Closed{{failed}}"),
        }
    }
}
