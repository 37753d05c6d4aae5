//! The vsock multiplexing handshake.
//!
//! After connecting, the proxy sends `CONNECT <port>\n` and the virtual machine monitor
//! answers `OK <host port>\n` once the guest accepted the connection. Anything after
//! that line is payload of the guest stream.

use std::fmt::{Display, Formatter};
use std::io::Write;

use anyhow::Context;
use bytes::{Buf, Bytes, BytesMut};
use nom::bytes::streaming::tag;
use nom::character::streaming::{char, digit1};
use nom::sequence::delimited;
use nom::IResult;

use crate::config::AckMode;
use crate::relay::write_out;
use crate::source::{PollableSource, ReadOutcome};

/// A recognized `OK <port>\n` acknowledgment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Ack {
    /// The digits following `OK `, as sent by the peer.
    pub port: String,
    /// Length of the acknowledgment line in bytes, newline included.
    pub len: usize,
}

impl Display for Ack {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "OK {}", self.port)
    }
}

/// Result of matching the acknowledgment at the start of a buffer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AckMatch {
    /// The buffer starts with a complete acknowledgment.
    Ack(Ack),
    /// The buffer is a strict prefix of some acknowledgment; more bytes are needed.
    Incomplete,
    /// No amount of additional bytes can turn the buffer into an acknowledgment.
    Mismatch,
}

fn ack_line(input: &[u8]) -> IResult<&[u8], &[u8]> {
    delimited(tag("OK "), digit1, char('\n'))(input)
}

/// Matches `OK`, a space, one or more ASCII digits and a newline, anchored at the start
/// of `buf`. The first newline ends the match.
pub fn parse_ack(buf: &[u8]) -> AckMatch {
    match ack_line(buf) {
        Ok((rest, digits)) => AckMatch::Ack(Ack {
            port: String::from_utf8_lossy(digits).into_owned(),
            len: buf.len() - rest.len(),
        }),
        Err(nom::Err::Incomplete(_)) => AckMatch::Incomplete,
        Err(_) => AckMatch::Mismatch,
    }
}

/// Whether the negotiation is still waiting on the acknowledgment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Progress {
    Pending,
    Acknowledged(Ack),
}

/// What to do with one chunk fed to the [`Negotiator`].
#[derive(Debug)]
pub struct Step {
    /// Bytes to write to the output sink now.
    pub forward: Bytes,
    pub progress: Progress,
}

/// Accumulates socket bytes until the acknowledgment is recognized.
///
/// Every byte fed in is handed back for forwarding exactly once: immediately in
/// [`AckMode::Forward`], or once the outcome is known in [`AckMode::Strip`] (where the
/// acknowledgment line itself is dropped). Bytes held when the peer closes are returned by
/// [`Negotiator::finish`].
#[derive(Debug)]
pub struct Negotiator {
    mode: AckMode,
    buffer: BytesMut,
    mismatched: bool,
}

impl Negotiator {
    pub fn new(mode: AckMode) -> Self {
        Self {
            mode,
            buffer: BytesMut::new(),
            mismatched: false,
        }
    }

    /// Feeds one non-empty read from the socket.
    pub fn feed(&mut self, chunk: &[u8]) -> Step {
        if self.mismatched {
            // The anchored prefix is fixed, nothing can match anymore
            return Step {
                forward: Bytes::copy_from_slice(chunk),
                progress: Progress::Pending,
            };
        }

        self.buffer.extend_from_slice(chunk);

        match parse_ack(&self.buffer) {
            AckMatch::Ack(ack) => {
                debug!("Recognized acknowledgment '{}' ({} bytes)", ack, ack.len);
                let forward = match self.mode {
                    AckMode::Forward => Bytes::copy_from_slice(chunk),
                    AckMode::Strip => {
                        self.buffer.advance(ack.len);
                        self.buffer.split().freeze()
                    }
                };
                self.buffer.clear();
                Step {
                    forward,
                    progress: Progress::Acknowledged(ack),
                }
            }
            AckMatch::Incomplete => Step {
                forward: match self.mode {
                    AckMode::Forward => Bytes::copy_from_slice(chunk),
                    AckMode::Strip => Bytes::new(),
                },
                progress: Progress::Pending,
            },
            AckMatch::Mismatch => {
                warn!(
                    "Handshake response does not start with 'OK <port>\\n', waiting for the peer to close"
                );
                self.mismatched = true;
                let forward = match self.mode {
                    AckMode::Forward => Bytes::copy_from_slice(chunk),
                    AckMode::Strip => self.buffer.split().freeze(),
                };
                self.buffer.clear();
                Step {
                    forward,
                    progress: Progress::Pending,
                }
            }
        }
    }

    /// Returns the bytes still held back, for when the peer closes before acknowledging.
    pub fn finish(mut self) -> Bytes {
        match self.mode {
            AckMode::Forward => Bytes::new(),
            AckMode::Strip => self.buffer.split().freeze(),
        }
    }
}

/// Reads from `socket` until the acknowledgment is recognized, forwarding to `output` as
/// it goes. Returns `None` if the peer closed first.
///
/// There is no timeout: a peer that neither acknowledges nor closes blocks this forever.
/// Likewise a peer that keeps sending a valid prefix (`OK 1111...` without a newline) grows
/// the handshake buffer without bound, and every read re-parses it from the start.
pub async fn negotiate<S, O>(
    socket: &mut S,
    output: &mut O,
    mode: AckMode,
    chunk_size: usize,
) -> anyhow::Result<Option<Ack>>
where
    S: PollableSource + ?Sized,
    O: Write + ?Sized,
{
    let mut negotiator = Negotiator::new(mode);
    let mut buf = vec![0u8; chunk_size];

    loop {
        let outcome = socket
            .read_ready(&mut buf)
            .await
            .with_context(|| "Failed to read handshake response from socket")?;

        match outcome {
            ReadOutcome::WouldBlock => continue,
            ReadOutcome::Closed => {
                let held = negotiator.finish();
                if !held.is_empty() {
                    write_out(output, &held)?;
                }
                return Ok(None);
            }
            ReadOutcome::Data(size) => {
                trace!("Read {} handshake bytes from socket", size);
                let step = negotiator.feed(&buf[..size]);
                if !step.forward.is_empty() {
                    write_out(output, &step.forward)?;
                }
                if let Progress::Acknowledged(ack) = step.progress {
                    return Ok(Some(ack));
                }
            }
        }
    }
}
