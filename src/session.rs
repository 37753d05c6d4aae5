use std::io::Write;

use crate::chunk_size;
use crate::config::{AckMode, Config, Target};
use crate::connector;
use crate::handshake::negotiate;
use crate::relay::relay;
use crate::source::PollableSource;
use crate::state::SessionState;

/// One proxied connection: connect, negotiate the channel, then relay until either side
/// closes.
pub struct Session {
    target: Target,
    ack_mode: AckMode,
    chunk_size: usize,
    state: SessionState,
}

impl Session {
    pub fn new(config: &Config) -> Self {
        Self {
            target: config.target.clone(),
            ack_mode: config.ack_mode,
            chunk_size: chunk_size(),
            state: SessionState::Connecting,
        }
    }

    /// Overrides the read chunk size, which defaults to the page size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs the session to completion and returns the closed state it ended in.
    ///
    /// Setup and I/O failures are returned as errors; a peer closing before the
    /// acknowledgment is not an error and ends in [`SessionState::ClosedFailed`].
    pub async fn run<I, O>(&mut self, input: &mut I, output: &mut O) -> anyhow::Result<SessionState>
    where
        I: PollableSource + ?Sized,
        O: Write + ?Sized,
    {
        info!("Connecting to channel {}", self.target);
        let mut socket = connector::connect(&self.target).await?;
        self.state.advance(SessionState::AwaitingAck)?;

        let ack = negotiate(&mut socket, output, self.ack_mode, self.chunk_size).await?;
        match ack {
            Some(ack) => {
                self.state.advance(SessionState::Established)?;
                info!("Channel {} established ({})", self.target, ack);
            }
            None => {
                warn!(
                    "Connection to {} closed before the handshake completed",
                    self.target
                );
                self.state.advance(SessionState::ClosedFailed)?;
                return Ok(self.state);
            }
        }

        let end = relay(&mut socket, input, output, self.chunk_size).await?;
        drop(socket);
        info!("Channel {} closed: {}", self.target, end);
        self.state.advance(SessionState::ClosedClean)?;
        Ok(self.state)
    }
}
